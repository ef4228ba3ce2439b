use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::Arc;

use async_trait::async_trait;
use wachat::binary::builder::NodeBuilder;
use wachat::media::{MediaError, MediaStore, UploadResult, DEFAULT_THUMBNAIL};
use wachat::test_utils::{drain_post_login, logged_in_harness};
use wachat::types::events::Event;
use wachat::types::message::MediaKind;
use wachat::types::Jid;

struct RecordingMediaStore {
    uploads: Mutex<Vec<(PathBuf, String)>>,
}

#[async_trait]
impl MediaStore for RecordingMediaStore {
    async fn upload(
        &self,
        local_path: &Path,
        dest_url: &str,
        _media_type: MediaKind,
        _from: &Jid,
        _to: &Jid,
    ) -> Result<UploadResult, MediaError> {
        self.uploads
            .lock()
            .unwrap()
            .push((local_path.to_path_buf(), dest_url.to_string()));
        Ok(UploadResult {
            url: "https://mms.example.net/d/hosted.jpg".to_string(),
            mimetype: "image/jpeg".to_string(),
            size: 4,
            name: "hosted.jpg".to_string(),
        })
    }

    async fn download(&self, _url: &str) -> Result<PathBuf, MediaError> {
        Err(MediaError::Download("not used".to_string()))
    }
}

struct FailingMediaStore;

#[async_trait]
impl MediaStore for FailingMediaStore {
    async fn upload(
        &self,
        _local_path: &Path,
        _dest_url: &str,
        _media_type: MediaKind,
        _from: &Jid,
        _to: &Jid,
    ) -> Result<UploadResult, MediaError> {
        Err(MediaError::Upload("slot rejected the body".to_string()))
    }

    async fn download(&self, _url: &str) -> Result<PathBuf, MediaError> {
        Err(MediaError::Download("not used".to_string()))
    }
}

fn temp_media_file(contents: &[u8]) -> PathBuf {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.jpg");
    std::fs::write(&path, contents).unwrap();
    // Leak the dir so the file outlives the helper.
    std::mem::forget(dir);
    path
}

#[tokio::test]
async fn test_duplicate_reply_skips_the_upload() {
    let (mut harness, mut server, _read_task) = logged_in_harness().await;
    drain_post_login(&mut harness, &mut server).await;

    let store = Arc::new(RecordingMediaStore {
        uploads: Mutex::new(Vec::new()),
    });
    harness.client.set_media_store(store.clone());

    let path = temp_media_file(b"jpeg");
    harness
        .client
        .send_image("31000000000", &path, Some("sunset".to_string()))
        .await
        .unwrap();

    let slot_request = server.next_node(&mut harness).await;
    assert_eq!(slot_request.tag, "iq");
    assert_eq!(
        slot_request.attrs().optional_string("xmlns"),
        Some("urn:xmpp:whatsapp:mms")
    );
    let media = slot_request.get_optional_child("media").unwrap();
    let mut attrs = media.attrs();
    assert_eq!(attrs.optional_string("type"), Some("image"));
    assert_eq!(attrs.optional_u64("size"), Some(4));
    assert!(attrs.optional_string("hash").is_some());
    let request_id = slot_request
        .attrs()
        .optional_string("id")
        .unwrap()
        .to_string();

    // The server already hosts this content.
    let reply = NodeBuilder::new("iq")
        .attr("from", "s.whatsapp.net")
        .attr("id", request_id)
        .attr("type", "result")
        .children([NodeBuilder::new("duplicate")
            .attr("url", "https://mms.example.net/d/already-there.jpg")
            .attr("size", "4")
            .build()])
        .build();
    server.send_node(&harness, &reply).await;

    let message = server.next_node(&mut harness).await;
    assert_eq!(message.tag, "message");
    let media = message.get_optional_child("media").unwrap();
    let mut attrs = media.attrs();
    assert_eq!(
        attrs.optional_string("url"),
        Some("https://mms.example.net/d/already-there.jpg")
    );
    assert_eq!(attrs.optional_string("type"), Some("image"));
    assert_eq!(attrs.optional_string("file"), Some("photo.jpg"));
    assert_eq!(attrs.optional_string("caption"), Some("sunset"));
    assert_eq!(media.bytes(), Some(DEFAULT_THUMBNAIL));

    // No HTTP upload happened.
    assert!(store.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_fresh_slot_uploads_then_sends() {
    let (mut harness, mut server, _read_task) = logged_in_harness().await;
    drain_post_login(&mut harness, &mut server).await;

    let store = Arc::new(RecordingMediaStore {
        uploads: Mutex::new(Vec::new()),
    });
    harness.client.set_media_store(store.clone());

    let path = temp_media_file(b"jpeg");
    harness
        .client
        .send_image("31000000000", &path, None)
        .await
        .unwrap();

    let slot_request = server.next_node(&mut harness).await;
    let request_id = slot_request
        .attrs()
        .optional_string("id")
        .unwrap()
        .to_string();

    let reply = NodeBuilder::new("iq")
        .attr("from", "s.whatsapp.net")
        .attr("id", request_id)
        .attr("type", "result")
        .children([NodeBuilder::new("media")
            .attr("url", "https://mms.example.net/u/slot-123")
            .build()])
        .build();
    server.send_node(&harness, &reply).await;

    let message = server.next_node(&mut harness).await;
    let media = message.get_optional_child("media").unwrap();
    assert_eq!(
        media.attrs().optional_string("url"),
        Some("https://mms.example.net/d/hosted.jpg")
    );

    let uploads = store.uploads.lock().unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].1, "https://mms.example.net/u/slot-123");
}

#[tokio::test]
async fn test_upload_failure_surfaces_as_media_event() {
    let (mut harness, mut server, _read_task) = logged_in_harness().await;
    drain_post_login(&mut harness, &mut server).await;

    harness.client.set_media_store(Arc::new(FailingMediaStore));

    let path = temp_media_file(b"jpeg");
    harness
        .client
        .send_image("31000000000", &path, None)
        .await
        .unwrap();

    let slot_request = server.next_node(&mut harness).await;
    let request_id = slot_request
        .attrs()
        .optional_string("id")
        .unwrap()
        .to_string();

    let reply = NodeBuilder::new("iq")
        .attr("from", "s.whatsapp.net")
        .attr("id", request_id)
        .attr("type", "result")
        .children([NodeBuilder::new("media")
            .attr("url", "https://mms.example.net/u/slot-999")
            .build()])
        .build();
    server.send_node(&harness, &reply).await;

    match harness.next_event().await {
        Event::MediaUploadFailed(failed) => {
            assert_eq!(failed.to.user, "31000000000");
            assert!(failed.reason.contains("slot rejected"));
        }
        other => panic!("expected MediaUploadFailed, got {other:?}"),
    }
}
