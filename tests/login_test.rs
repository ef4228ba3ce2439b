use wachat::binary::builder::NodeBuilder;
use wachat::client::SessionState;
use wachat::test_utils::{
    logged_in_harness, test_config, test_harness, FakeServer, TEST_NONCE,
};
use wachat::types::events::Event;

#[tokio::test]
async fn test_one_round_trip_login_with_cached_challenge() {
    let (mut harness, mut server, _read_task) = logged_in_harness().await;

    assert!(harness.client.is_logged_in());
    assert_eq!(harness.client.session_state(), SessionState::LoggedIn);

    // The cached nonce was re-persisted before the state advanced.
    let persisted = std::fs::read(&harness.client.config.challenge_file).unwrap();
    assert_eq!(persisted, TEST_NONCE);

    // Right after login the client publishes pre-keys and announces
    // presence, both on the now-encrypted stream.
    let publication = server.next_node(&mut harness).await;
    assert_eq!(publication.tag, "iq");
    assert_eq!(publication.attrs().optional_string("xmlns"), Some("encrypt"));
    let presence = server.next_node(&mut harness).await;
    assert_eq!(presence.attrs().optional_string("type"), Some("available"));
}

#[tokio::test]
async fn test_challenge_round_trip_login() {
    let config = test_config();
    let mut harness = test_harness(config.clone());
    harness.client.connect().await.unwrap();
    let _read_task = harness.spawn_read_loop();

    let mut server = FakeServer::new();
    let auth = loop {
        let node = server.next_node(&mut harness).await;
        if node.tag == "auth" {
            break node;
        }
    };
    // No cached challenge: the auth carries no blob yet.
    assert!(auth.bytes().is_none());
    assert_eq!(
        harness.client.session_state(),
        SessionState::AwaitingChallengeOrSuccess
    );

    // Issue a fresh nonce; the client answers with a sealed response.
    let nonce = [0x5C; 20];
    let challenge = NodeBuilder::new("challenge").bytes(nonce.to_vec()).build();
    server.send_node(&harness, &challenge).await;

    let response = server.next_node(&mut harness).await;
    assert_eq!(response.tag, "response");
    server.accept_response(&config, &nonce, &response);
    assert_eq!(
        harness.client.session_state(),
        SessionState::AwaitingSuccess
    );

    let success = NodeBuilder::new("success").attr("status", "active").build();
    server.send_node(&harness, &success).await;
    match harness.next_event().await {
        Event::LoggedIn(logged_in) => {
            assert_eq!(logged_in.jid.to_string(), "491234567890@s.whatsapp.net");
        }
        other => panic!("expected LoggedIn, got {other:?}"),
    }

    // The fresh nonce is now the cached challenge for next startup.
    let persisted = std::fs::read(&config.challenge_file).unwrap();
    assert_eq!(persisted, nonce);
}

#[tokio::test]
async fn test_auth_failure_is_terminal() {
    let config = test_config();
    let mut harness = test_harness(config);
    harness.client.connect().await.unwrap();
    let _read_task = harness.spawn_read_loop();

    let mut server = FakeServer::new();
    loop {
        let node = server.next_node(&mut harness).await;
        if node.tag == "auth" {
            break;
        }
    }

    let failure = NodeBuilder::new("failure").attr("reason", "401").build();
    server.send_node(&harness, &failure).await;

    match harness.next_event().await {
        Event::LoginFailure(failure) => assert_eq!(failure.reason, "401"),
        other => panic!("expected LoginFailure, got {other:?}"),
    }
    assert_eq!(harness.client.session_state(), SessionState::Failed);
    assert!(!harness.client.is_logged_in());
}
