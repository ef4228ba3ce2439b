//! Fixtures for exercising the client against an in-process fake server:
//! a mock transport whose wire is a pair of channels, plus helpers for
//! framing, ciphering and decoding both directions of the conversation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::binary;
use crate::binary::builder::NodeBuilder;
use crate::binary::consts::MESSAGE_START;
use crate::binary::node::Node;
use crate::client::Client;
use crate::config::Config;
use crate::crypto::{derive_keys, KeyStream};
use crate::socket::framing::{encode_frame, FrameDecoder};
use crate::store::MemoryStore;
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::events::Event;

pub const TEST_NONCE: [u8; 32] = [0xAA; 32];

const WAIT: Duration = Duration::from_secs(5);

pub struct MockTransport {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error> {
        self.outbound
            .send(data.to_vec())
            .map_err(|_| anyhow::anyhow!("outbound receiver dropped"))
    }

    async fn disconnect(&self) {}
}

/// Hands out one transport wired to the harness channels; a second
/// `create_transport` call (reconnect) fails, which tests never need.
pub struct MockTransportFactory {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let inbound = self
            .inbound
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("mock transport already created"))?;
        Ok((
            Arc::new(MockTransport {
                outbound: self.outbound.clone(),
            }),
            inbound,
        ))
    }
}

/// A client plus both ends of its fake wire and its event stream.
pub struct TestHarness {
    pub client: Arc<Client>,
    pub store: Arc<MemoryStore>,
    pub outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    pub inbound: mpsc::Sender<TransportEvent>,
    pub events: mpsc::UnboundedReceiver<Event>,
}

static CONFIG_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn test_config() -> Config {
    let unique = CONFIG_COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut config = Config::new("491234567890", "cGFzc3dvcmQ=");
    config.username = "Test".to_string();
    config.reconnect = false;
    config.challenge_file = std::env::temp_dir().join(format!(
        "wachat-test-challenge-{}-{unique}",
        std::process::id()
    ));
    config
}

pub fn test_harness(config: Config) -> TestHarness {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::channel(100);
    let factory = MockTransportFactory {
        outbound: outbound_tx,
        inbound: Mutex::new(Some(inbound_rx)),
    };
    let store = Arc::new(MemoryStore::new());
    let client = Client::new(config, store.clone(), Arc::new(factory));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    client.add_event_handler(Arc::new(move |event: &Event| {
        let _ = events_tx.send(event.clone());
    }));

    TestHarness {
        client,
        store,
        outbound: outbound_rx,
        inbound: inbound_tx,
        events: events_rx,
    }
}

impl TestHarness {
    pub fn spawn_read_loop(&self) -> JoinHandle<Result<(), anyhow::Error>> {
        let client = self.client.clone();
        tokio::spawn(async move { client.read_loop().await })
    }

    /// Injects raw bytes as if they arrived from the network.
    pub async fn inject_bytes(&self, data: Vec<u8>) {
        self.inbound
            .send(TransportEvent::DataReceived(data.into()))
            .await
            .expect("inbound channel open");
    }

    /// Frames (and optionally ciphers) a node and injects it.
    pub async fn inject_node(&self, node: &Node, keystream: Option<&mut KeyStream>) {
        let payload = binary::marshal(node).expect("marshal");
        let framed = match keystream {
            Some(ks) => encode_frame(&ks.encode(&payload), true, None).expect("frame"),
            None => encode_frame(&payload, false, None).expect("frame"),
        };
        self.inject_bytes(framed).await;
    }

    /// Waits for the next event with a generous deadline.
    pub async fn next_event(&mut self) -> Event {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel open")
    }
}

/// What the fake server sees in one outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum WireItem {
    StreamOpen,
    Node(Node),
}

/// Decodes the client's outbound byte stream into nodes, transparently
/// stripping the connection magic and deciphering once keys are installed.
pub struct WireView {
    decoder: FrameDecoder,
    keystream: Option<KeyStream>,
    seen_magic: bool,
}

impl Default for WireView {
    fn default() -> Self {
        Self::new()
    }
}

impl WireView {
    pub fn new() -> Self {
        Self {
            decoder: FrameDecoder::new(),
            keystream: None,
            seen_magic: false,
        }
    }

    /// Installs the server-side deciphering stream (built from the
    /// client's writer keys).
    pub fn install_keystream(&mut self, keystream: KeyStream) {
        self.keystream = Some(keystream);
    }

    pub fn feed(&mut self, mut data: &[u8]) {
        if !self.seen_magic && data.len() >= MESSAGE_START.len() && data[..3] == MESSAGE_START {
            self.seen_magic = true;
            data = &data[3..];
        }
        self.decoder.feed(data);
    }

    pub fn next_item(&mut self) -> Option<WireItem> {
        let frame = self.decoder.next_frame()?;
        let payload = if frame.encrypted {
            let keystream = self
                .keystream
                .as_mut()
                .expect("encrypted frame before keys were installed");
            keystream.decode(&frame.body).expect("frame MAC")
        } else {
            frame.body.to_vec()
        };

        if payload.len() >= 3 && payload[2] == binary::token::STREAM_START {
            return Some(WireItem::StreamOpen);
        }
        Some(WireItem::Node(
            binary::unmarshal(&payload).expect("unmarshal"),
        ))
    }
}

/// The server half of the fixture: decodes client output and ciphers
/// server-to-client traffic once the session keys are negotiated.
pub struct FakeServer {
    pub view: WireView,
    pub writer: Option<KeyStream>,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            view: WireView::new(),
            writer: None,
        }
    }

    /// Waits for the next node the client puts on the wire, skipping the
    /// stream opener.
    pub async fn next_node(&mut self, harness: &mut TestHarness) -> Node {
        loop {
            if let Some(item) = self.view.next_item() {
                match item {
                    WireItem::StreamOpen => continue,
                    WireItem::Node(node) => return node,
                }
            }
            let chunk = timeout(WAIT, harness.outbound.recv())
                .await
                .expect("timed out waiting for an outbound frame")
                .expect("outbound channel open");
            self.view.feed(&chunk);
        }
    }

    /// Ciphers and injects a server-to-client node.
    pub async fn send_node(&mut self, harness: &TestHarness, node: &Node) {
        harness.inject_node(node, self.writer.as_mut()).await;
    }

    /// Derives both directions from the login nonce and verifies the auth
    /// blob the client sealed: msisdn, then the nonce it answered.
    pub fn accept_auth(&mut self, config: &Config, nonce: &[u8], auth: &Node) {
        assert_eq!(auth.tag, "auth");
        assert_eq!(auth.attrs().optional_string("mechanism"), Some("WAUTH-2"));
        assert_eq!(
            auth.attrs().optional_string("user"),
            Some(config.msisdn.as_str())
        );
        self.accept_sealed_blob(config, nonce, auth.bytes().expect("auth blob payload"));
    }

    /// The challenge-path counterpart: verifies the `response` blob.
    pub fn accept_response(&mut self, config: &Config, nonce: &[u8], response: &Node) {
        assert_eq!(response.tag, "response");
        self.accept_sealed_blob(
            config,
            nonce,
            response.bytes().expect("response blob payload"),
        );
    }

    /// Checks the literal blob layout the protocol mandates:
    /// `[00 00 00 00] || msisdn || nonce || ts || ua || " MccMnc/<mcc><mnc>"`.
    fn accept_sealed_blob(&mut self, config: &Config, nonce: &[u8], blob: &[u8]) {
        let keys = derive_keys(&config.password, nonce).expect("derive keys");
        let mut client_to_server = KeyStream::new(&keys.write_cipher, &keys.write_mac);
        let server_to_client = KeyStream::new(&keys.read_cipher, &keys.read_mac);

        let plaintext = client_to_server.decode(blob).expect("auth blob MAC");
        assert!(
            plaintext.starts_with(&[0, 0, 0, 0]),
            "auth blob must open with four zero bytes"
        );
        let msisdn_end = 4 + config.msisdn.len();
        assert_eq!(&plaintext[4..msisdn_end], config.msisdn.as_bytes());
        assert_eq!(&plaintext[msisdn_end..msisdn_end + nonce.len()], nonce);
        let mcc_mnc = format!(" MccMnc/{}{}", config.mcc, config.mnc);
        assert!(
            plaintext.ends_with(mcc_mnc.as_bytes()),
            "auth blob must close with the MccMnc marker"
        );

        self.view.install_keystream(client_to_server);
        self.writer = Some(server_to_client);
    }
}

/// Runs the one-round-trip login dance over a cached challenge and returns
/// the logged-in pair. The post-login traffic (pre-key publication and
/// presence) is left on the wire for the caller.
pub async fn logged_in_harness() -> (TestHarness, FakeServer, JoinHandle<Result<(), anyhow::Error>>)
{
    let config = test_config();
    std::fs::write(&config.challenge_file, TEST_NONCE).expect("seed challenge file");

    let mut harness = test_harness(config.clone());
    harness.client.connect().await.expect("connect");
    let read_task = harness.spawn_read_loop();

    let mut server = FakeServer::new();
    // The features node precedes the auth on a fresh stream.
    let auth = loop {
        let node = server.next_node(&mut harness).await;
        if node.tag == "auth" {
            break node;
        }
    };
    server.accept_auth(&config, &TEST_NONCE, &auth);

    let success = NodeBuilder::new("success")
        .attr("t", "1700000000")
        .attr("status", "active")
        .build();
    server.send_node(&harness, &success).await;

    match harness.next_event().await {
        Event::LoggedIn(_) => {}
        other => panic!("expected LoggedIn, got {other:?}"),
    }

    (harness, server, read_task)
}

/// Drains the pre-key publication and presence the client emits right
/// after login, returning them for inspection.
pub async fn drain_post_login(
    harness: &mut TestHarness,
    server: &mut FakeServer,
) -> (Node, Node) {
    let publication = server.next_node(harness).await;
    assert_eq!(publication.tag, "iq");
    let presence = server.next_node(harness).await;
    assert_eq!(presence.tag, "presence");
    (publication, presence)
}
