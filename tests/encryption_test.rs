use wachat::axolotl::{
    cipher, KeyPair, MessageType, PendingPreKey, PreKeyBundle, SessionRecord,
};
use wachat::binary::builder::NodeBuilder;
use wachat::binary::node::Node;
use wachat::test_utils::{drain_post_login, logged_in_harness, FakeServer, TestHarness};
use wachat::types::events::Event;

fn u24(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]])
}

/// Reads the published key material back out of the publication iq, the
/// way the server would.
fn bundle_from_publication(publication: &Node) -> PreKeyBundle {
    let identity_key: [u8; 32] = publication
        .get_optional_child("identity")
        .and_then(|n| n.bytes())
        .unwrap()
        .try_into()
        .unwrap();
    let registration_id = u32::from_be_bytes(
        publication
            .get_optional_child("registration")
            .and_then(|n| n.bytes())
            .unwrap()
            .try_into()
            .unwrap(),
    );

    let first_key = publication
        .get_optional_child_by_tag(&["list", "key"])
        .unwrap();
    let pre_key_id = u24(first_key.get_optional_child("id").unwrap().bytes().unwrap());
    let pre_key: [u8; 32] = first_key
        .get_optional_child("value")
        .unwrap()
        .bytes()
        .unwrap()
        .try_into()
        .unwrap();

    let skey = publication.get_optional_child("skey").unwrap();
    let signed_pre_key_id = u24(skey.get_optional_child("id").unwrap().bytes().unwrap());
    let signed_pre_key: [u8; 32] = skey
        .get_optional_child("value")
        .unwrap()
        .bytes()
        .unwrap()
        .try_into()
        .unwrap();
    let signed_pre_key_signature = skey
        .get_optional_child("signature")
        .unwrap()
        .bytes()
        .unwrap()
        .to_vec();

    PreKeyBundle {
        registration_id,
        identity_key,
        pre_key_id: Some(pre_key_id),
        pre_key: Some(pre_key),
        signed_pre_key_id,
        signed_pre_key,
        signed_pre_key_signature,
    }
}

async fn expect_read_receipt(server: &mut FakeServer, harness: &mut TestHarness, id: &str) {
    let receipt = server.next_node(harness).await;
    assert_eq!(receipt.tag, "receipt");
    assert_eq!(receipt.attrs().optional_string("id"), Some(id));
}

#[tokio::test]
async fn test_publication_carries_full_key_material() {
    let (mut harness, mut server, _read_task) = logged_in_harness().await;
    let (publication, _presence) = drain_post_login(&mut harness, &mut server).await;

    let mut attrs = publication.attrs();
    assert_eq!(attrs.optional_string("xmlns"), Some("encrypt"));
    assert_eq!(attrs.optional_string("type"), Some("set"));

    let list = publication.get_optional_child("list").unwrap();
    assert_eq!(list.get_children_by_tag("key").len(), 200);
    assert_eq!(harness.store.pre_key_count(), 200);

    assert_eq!(
        publication
            .get_optional_child("type")
            .and_then(|n| n.bytes()),
        Some(&[0x05][..])
    );

    // The signed pre-key verifies against the published identity.
    let bundle = bundle_from_publication(&publication);
    assert!(bundle.verify_signature());
}

#[tokio::test]
async fn test_unknown_recipient_falls_back_to_plaintext() {
    let (mut harness, mut server, _read_task) = logged_in_harness().await;
    drain_post_login(&mut harness, &mut server).await;

    // No cached session and an empty session store: the send parks the
    // plaintext and asks the server for keys.
    let client = harness.client.clone();
    let sent = client.send_encrypted_message("40000000000", "hi").await.unwrap();
    assert_eq!(sent, None);

    let fetch = server.next_node(&mut harness).await;
    assert_eq!(fetch.tag, "iq");
    let mut attrs = fetch.attrs();
    assert_eq!(attrs.optional_string("xmlns"), Some("encrypt"));
    assert_eq!(attrs.optional_string("type"), Some("get"));
    let fetch_id = attrs.optional_string("id").unwrap().to_string();
    let users = fetch
        .get_optional_child("key")
        .unwrap()
        .get_children_by_tag("user");
    assert_eq!(users.len(), 1);
    assert_eq!(
        users[0].attrs().optional_string("jid"),
        Some("40000000000@s.whatsapp.net")
    );

    // The server has no keys for that jid: empty list in the reply.
    let reply = NodeBuilder::new("iq")
        .attr("from", "s.whatsapp.net")
        .attr("id", fetch_id)
        .attr("type", "result")
        .children([NodeBuilder::new("list").build()])
        .build();
    server.send_node(&harness, &reply).await;

    match harness.next_event().await {
        Event::EncryptionUnavailable(unavailable) => {
            assert_eq!(unavailable.jid.user, "40000000000");
        }
        other => panic!("expected EncryptionUnavailable, got {other:?}"),
    }

    // The parked message goes out unencrypted.
    let message = server.next_node(&mut harness).await;
    assert_eq!(message.tag, "message");
    assert_eq!(
        message.get_optional_child("body").and_then(|b| b.bytes()),
        Some(&b"hi"[..])
    );

    // Subsequent sends skip the fetch entirely.
    let sent = client.send_encrypted_message("40000000000", "again").await.unwrap();
    assert!(sent.is_some());
    let message = server.next_node(&mut harness).await;
    assert_eq!(
        message.get_optional_child("body").and_then(|b| b.bytes()),
        Some(&b"again"[..])
    );
}

#[tokio::test]
async fn test_inbound_pkmsg_establishes_session_and_replies_encrypted() {
    let (mut harness, mut server, _read_task) = logged_in_harness().await;
    let (publication, _presence) = drain_post_login(&mut harness, &mut server).await;

    // A peer fetched our bundle and opens a session toward us.
    let bundle = bundle_from_publication(&publication);
    let peer_identity = KeyPair::generate();
    let base_key = KeyPair::generate();
    let mut peer_session = SessionRecord::initialize_alice(
        &peer_identity,
        &base_key,
        bundle.identity_key,
        bundle.signed_pre_key,
        bundle.pre_key,
        bundle.registration_id,
        PendingPreKey {
            pre_key_id: bundle.pre_key_id,
            signed_pre_key_id: bundle.signed_pre_key_id,
            base_key: base_key.public,
        },
    );
    let wire = cipher::encrypt(&mut peer_session, 4242, b"hello from peer").unwrap();
    assert_eq!(wire.message_type, MessageType::PkMsg);

    let inbound = NodeBuilder::new("message")
        .attr("from", "40000000001@s.whatsapp.net")
        .attr("id", "enc-1")
        .attr("type", "text")
        .attr("t", "1700000000")
        .children([NodeBuilder::new("enc")
            .attr("v", "1")
            .attr("type", "pkmsg")
            .attr("av", "2.12.81")
            .bytes(wire.data)
            .build()])
        .build();
    server.send_node(&harness, &inbound).await;

    expect_read_receipt(&mut server, &mut harness, "enc-1").await;
    match harness.next_event().await {
        Event::Typing(_) => {}
        other => panic!("expected Typing, got {other:?}"),
    }
    match harness.next_event().await {
        Event::Text(text) => {
            assert_eq!(text.body, "hello from peer");
            assert_eq!(text.info.from.user, "40000000001");
        }
        other => panic!("expected Text, got {other:?}"),
    }

    // The consumed one-time pre-key was burned.
    assert_eq!(harness.store.pre_key_count(), 199);

    // Replying rides the established session as a plain `msg`.
    let client = harness.client.clone();
    let sent = client
        .send_encrypted_message("40000000001", "reply")
        .await
        .unwrap();
    assert!(sent.is_some());

    let message = server.next_node(&mut harness).await;
    let enc = message.get_optional_child("enc").unwrap();
    assert_eq!(enc.attrs().optional_string("type"), Some("msg"));
    assert_eq!(enc.attrs().optional_string("v"), Some("1"));

    let plaintext = cipher::decrypt(&mut peer_session, enc.bytes().unwrap()).unwrap();
    assert_eq!(plaintext, b"reply");
}

#[tokio::test]
async fn test_encrypt_notification_replenishes_the_pool() {
    let (mut harness, mut server, _read_task) = logged_in_harness().await;
    drain_post_login(&mut harness, &mut server).await;
    assert_eq!(harness.store.pre_key_count(), 200);

    let notification = NodeBuilder::new("notification")
        .attr("from", "s.whatsapp.net")
        .attr("id", "n-1")
        .attr("type", "encrypt")
        .children([NodeBuilder::new("count").attr("value", "150").build()])
        .build();
    server.send_node(&harness, &notification).await;

    // Ack first, then the top-up publication for the missing 50.
    let ack = server.next_node(&mut harness).await;
    assert_eq!(ack.tag, "ack");
    assert_eq!(ack.attrs().optional_string("class"), Some("notification"));

    let publication = server.next_node(&mut harness).await;
    assert_eq!(publication.attrs().optional_string("xmlns"), Some("encrypt"));
    let list = publication.get_optional_child("list").unwrap();
    assert_eq!(list.get_children_by_tag("key").len(), 50);
    // Replenishment never re-mints the identity.
    assert!(publication.get_optional_child("skey").is_none());

    assert_eq!(harness.store.pre_key_count(), 250);
}
