use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::prelude::*;
use chrono::Utc;
use log::{debug, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::binary::builder::NodeBuilder;
use crate::binary::node::Node;
use crate::client::{Client, ClientError};
use crate::types::events::{Event, MediaUploadFailed};
use crate::types::message::MediaKind;
use crate::types::Jid;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("no media store is configured")]
    NoMediaStore,
}

#[derive(Debug, Clone)]
pub struct UploadResult {
    pub url: String,
    pub mimetype: String,
    pub size: u64,
    pub name: String,
}

/// External HTTPS collaborator moving media bodies. Calls may run
/// concurrently with the session; they touch no session state.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(
        &self,
        local_path: &Path,
        dest_url: &str,
        media_type: MediaKind,
        from: &Jid,
        to: &Jid,
    ) -> Result<UploadResult, MediaError>;

    async fn download(&self, url: &str) -> Result<PathBuf, MediaError>;
}

/// External thumbnail generator. Implementations may fall back to
/// `DEFAULT_THUMBNAIL`.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    async fn image_thumbnail(&self, path: &Path) -> Result<Vec<u8>, MediaError>;
    async fn video_thumbnail(&self, path: &Path) -> Result<Vec<u8>, MediaError>;
}

/// Minimal valid grey JPEG used when no thumbnailer is installed or the
/// backend fails.
pub const DEFAULT_THUMBNAIL: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x00, 0x00,
    0x01, 0x00, 0x01, 0x00, 0x00, 0xFF, 0xDB, 0x00, 0x43, 0x00, 0x10, 0x10, 0x10, 0x10, 0x10,
    0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10,
    0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10,
    0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10,
    0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0xFF, 0xC0, 0x00, 0x0B, 0x08,
    0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11, 0x00, 0xFF, 0xC4, 0x00, 0x14, 0x00, 0x01, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08,
    0xFF, 0xC4, 0x00, 0x14, 0x10, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00,
    0x3F, 0x00, 0x7F, 0xFF, 0xD9,
];

/// Metadata held between the slot request and the server's reply.
pub struct PendingMediaUpload {
    pub filepath: PathBuf,
    pub filesize: u64,
    pub to: Jid,
    pub kind: MediaKind,
    pub caption: Option<String>,
}

impl Client {
    pub async fn send_image(
        &self,
        to: &str,
        path: impl Into<PathBuf>,
        caption: Option<String>,
    ) -> Result<(), ClientError> {
        self.request_media_upload(to, path.into(), MediaKind::Image, caption)
            .await
    }

    pub async fn send_video(
        &self,
        to: &str,
        path: impl Into<PathBuf>,
        caption: Option<String>,
    ) -> Result<(), ClientError> {
        self.request_media_upload(to, path.into(), MediaKind::Video, caption)
            .await
    }

    pub async fn send_audio(
        &self,
        to: &str,
        path: impl Into<PathBuf>,
    ) -> Result<(), ClientError> {
        self.request_media_upload(to, path.into(), MediaKind::Audio, None)
            .await
    }

    /// Phase one of a media send: ask the server for an upload slot,
    /// keyed by the content hash, and remember the file until the reply.
    async fn request_media_upload(
        &self,
        to: &str,
        filepath: PathBuf,
        kind: MediaKind,
        caption: Option<String>,
    ) -> Result<(), ClientError> {
        let contents = match tokio::fs::read(&filepath).await {
            Ok(contents) => contents,
            Err(e) => {
                self.dispatch_event(Event::MediaUploadFailed(MediaUploadFailed {
                    to: Jid::from_msisdn(to),
                    filepath: filepath.display().to_string(),
                    reason: e.to_string(),
                }));
                return Ok(());
            }
        };
        let hash = BASE64_STANDARD.encode(Sha256::digest(&contents));
        let filesize = contents.len() as u64;

        let id = self.next_message_id("media");
        self.media_queue.lock().await.insert(
            id.clone(),
            PendingMediaUpload {
                filepath,
                filesize,
                to: Jid::from_msisdn(to),
                kind,
                caption,
            },
        );

        let node = NodeBuilder::new("iq")
            .attr("id", id)
            .attr("type", "set")
            .attr("to", self.server_jid().to_string())
            .attr("xmlns", "urn:xmpp:whatsapp:mms")
            .children([NodeBuilder::new("media")
                .attr("hash", hash)
                .attr("type", kind.as_str())
                .attr("size", filesize.to_string())
                .build()])
            .build();
        self.send_node(node).await
    }

    /// Phase two: the server answered with either a `duplicate` (content
    /// already hosted) or a fresh upload slot. Returns false when the iq id
    /// belongs to no pending upload.
    pub(crate) async fn handle_media_response(&self, node: &Node) -> bool {
        let Some(id) = node.attrs().optional_string("id") else {
            return false;
        };
        let Some(pending) = self.media_queue.lock().await.remove(id) else {
            return false;
        };

        if let Some(duplicate) = node.get_optional_child("duplicate") {
            let mut attrs = duplicate.attrs();
            let url = attrs.optional_string("url").unwrap_or_default().to_string();
            let size = attrs.optional_u64("size").unwrap_or(pending.filesize);
            debug!(target: "Client/Media", "Server already hosts content, reusing {url}");
            self.finish_media_send(&pending, url, size).await;
            return true;
        }

        if let Some(media) = node.get_optional_child("media") {
            let upload_url = media
                .attrs()
                .optional_string("url")
                .unwrap_or_default()
                .to_string();
            let store = self.media_store.lock().expect("lock poisoned").clone();
            let Some(store) = store else {
                self.dispatch_event(Event::MediaUploadFailed(MediaUploadFailed {
                    to: pending.to.clone(),
                    filepath: pending.filepath.display().to_string(),
                    reason: MediaError::NoMediaStore.to_string(),
                }));
                return true;
            };

            match store
                .upload(
                    &pending.filepath,
                    &upload_url,
                    pending.kind,
                    self.self_jid(),
                    &pending.to,
                )
                .await
            {
                Ok(result) => {
                    self.finish_media_send(&pending, result.url, result.size).await;
                }
                Err(e) => {
                    warn!(target: "Client/Media", "Upload failed: {e}");
                    self.dispatch_event(Event::MediaUploadFailed(MediaUploadFailed {
                        to: pending.to.clone(),
                        filepath: pending.filepath.display().to_string(),
                        reason: e.to_string(),
                    }));
                }
            }
            return true;
        }

        false
    }

    /// Builds and sends the final media message carrying the hosted URL and
    /// a preview thumbnail.
    async fn finish_media_send(&self, pending: &PendingMediaUpload, url: String, size: u64) {
        let file_name = pending
            .filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let thumbnail = self.make_thumbnail(pending).await;
        let media = NodeBuilder::new("media")
            .attr("type", pending.kind.as_str())
            .attr("url", url)
            .attr("size", size.to_string())
            .attr("file", file_name)
            .optional_attr("caption", pending.caption.clone())
            .bytes(thumbnail)
            .build();

        let id = self.next_message_id("message");
        let node = NodeBuilder::new("message")
            .attr("to", pending.to.to_string())
            .attr("type", "media")
            .attr("id", id)
            .attr("t", Utc::now().timestamp().to_string())
            .children([media])
            .build();
        if let Err(e) = self.send_node(node).await {
            warn!(target: "Client/Media", "Failed to send media message: {e}");
        }
    }

    async fn make_thumbnail(&self, pending: &PendingMediaUpload) -> Vec<u8> {
        let thumbnailer = self.thumbnailer.lock().expect("lock poisoned").clone();
        let Some(thumbnailer) = thumbnailer else {
            return DEFAULT_THUMBNAIL.to_vec();
        };
        let result = match pending.kind {
            MediaKind::Image => thumbnailer.image_thumbnail(&pending.filepath).await,
            MediaKind::Video => thumbnailer.video_thumbnail(&pending.filepath).await,
            MediaKind::Audio => return Vec::new(),
        };
        match result {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target: "Client/Media", "Thumbnail generation failed, using default: {e}");
                DEFAULT_THUMBNAIL.to_vec()
            }
        }
    }
}
