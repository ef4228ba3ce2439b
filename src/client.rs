use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::Utc;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::time::{sleep, Duration};

use crate::axolotl::SessionRecord;
use crate::binary;
use crate::binary::error::BinaryError;
use crate::binary::node::Node;
use crate::config::Config;
use crate::crypto::KeyStream;
use crate::media::{MediaStore, PendingMediaUpload, Thumbnailer};
use crate::message::MessageProcessor;
use crate::send::QueuedSend;
use crate::socket::framing::{encode_frame, Frame, FrameDecoder};
use crate::socket::SocketError;
use crate::store::KeyStore;
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::events::{Disconnected, Event, EventBus, EventHandler, StreamError};
use crate::types::Jid;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("client is not logged in")]
    NotLoggedIn,
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("codec error: {0}")]
    Binary(#[from] BinaryError),
    #[error("encryption error: {0}")]
    Encryption(String),
}

/// Where the session currently stands. Only the read loop advances this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    HandshakeInit,
    AwaitingChallengeOrSuccess,
    AwaitingSuccess,
    LoggedIn,
    Failed,
}

pub struct Client {
    pub config: Config,
    pub(crate) self_jid: Jid,
    pub(crate) key_store: Arc<dyn KeyStore>,
    transport_factory: Arc<dyn TransportFactory>,
    pub(crate) media_store: StdMutex<Option<Arc<dyn MediaStore>>>,
    pub(crate) thumbnailer: StdMutex<Option<Arc<dyn Thumbnailer>>>,

    pub(crate) state: StdMutex<SessionState>,
    pub(crate) is_logged_in: AtomicBool,
    is_connecting: AtomicBool,
    is_running: AtomicBool,
    pub(crate) shutdown_notifier: Notify,
    expected_disconnect: AtomicBool,
    auto_reconnect_errors: AtomicU32,

    pub(crate) transport: Mutex<Option<Arc<dyn Transport>>>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    pub(crate) writer_key: Mutex<Option<KeyStream>>,
    pub(crate) reader_key: Mutex<Option<KeyStream>>,
    /// Writer stream parked between the challenge answer and `success`.
    pub(crate) pending_writer: Mutex<Option<KeyStream>>,

    pub(crate) response_waiters: Mutex<HashMap<String, oneshot::Sender<Node>>>,
    id_counter: AtomicU64,

    pub(crate) send_queue: Mutex<Vec<QueuedSend>>,
    pub(crate) media_queue: Mutex<HashMap<String, PendingMediaUpload>>,
    pub(crate) message_processor: MessageProcessor,

    pub(crate) event_bus: EventBus,
    pub(crate) pending_challenge: Mutex<Option<Vec<u8>>>,

    // Encryption bridge state.
    pub(crate) cipher_sessions: Mutex<HashMap<String, SessionRecord>>,
    pub(crate) pending_plaintext: Mutex<HashMap<String, Vec<String>>>,
    pub(crate) pending_key_requests: Mutex<HashMap<String, Vec<Jid>>>,
    pub(crate) skip_encryption: Mutex<HashSet<String>>,
}

impl Client {
    pub fn new(
        config: Config,
        key_store: Arc<dyn KeyStore>,
        transport_factory: Arc<dyn TransportFactory>,
    ) -> Arc<Self> {
        let self_jid = Jid::from_msisdn(&config.msisdn);
        Arc::new(Self {
            self_jid,
            config,
            key_store,
            transport_factory,
            media_store: StdMutex::new(None),
            thumbnailer: StdMutex::new(None),

            state: StdMutex::new(SessionState::Disconnected),
            is_logged_in: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            is_running: AtomicBool::new(false),
            shutdown_notifier: Notify::new(),
            expected_disconnect: AtomicBool::new(false),
            auto_reconnect_errors: AtomicU32::new(0),

            transport: Mutex::new(None),
            events_rx: Mutex::new(None),
            writer_key: Mutex::new(None),
            reader_key: Mutex::new(None),
            pending_writer: Mutex::new(None),

            response_waiters: Mutex::new(HashMap::new()),
            id_counter: AtomicU64::new(0),

            send_queue: Mutex::new(Vec::new()),
            media_queue: Mutex::new(HashMap::new()),
            message_processor: MessageProcessor::new(),

            event_bus: EventBus::new(),
            pending_challenge: Mutex::new(None),

            cipher_sessions: Mutex::new(HashMap::new()),
            pending_plaintext: Mutex::new(HashMap::new()),
            pending_key_requests: Mutex::new(HashMap::new()),
            skip_encryption: Mutex::new(HashSet::new()),
        })
    }

    /// Installs the external media upload/download collaborator.
    pub fn set_media_store(&self, media_store: Arc<dyn MediaStore>) {
        *self.media_store.lock().expect("lock poisoned") = Some(media_store);
    }

    /// Installs the external thumbnail generator.
    pub fn set_thumbnailer(&self, thumbnailer: Arc<dyn Thumbnailer>) {
        *self.thumbnailer.lock().expect("lock poisoned") = Some(thumbnailer);
    }

    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler>) {
        self.event_bus.add_handler(handler);
    }

    pub fn dispatch_event(&self, event: Event) {
        self.event_bus.dispatch(&event);
    }

    pub fn is_logged_in(&self) -> bool {
        self.is_logged_in.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.transport
            .try_lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    pub fn session_state(&self) -> SessionState {
        *self.state.lock().expect("state lock poisoned")
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    pub fn self_jid(&self) -> &Jid {
        &self.self_jid
    }

    pub(crate) fn server_jid(&self) -> Jid {
        Jid::new("", self.config.server.clone())
    }

    /// Generates `prefix-<unix ts>-<n>`; distinct for the process lifetime.
    pub fn next_message_id(&self, prefix: &str) -> String {
        let count = self.id_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}-{}", prefix, Utc::now().timestamp(), count)
    }

    /// The main entry point: connects and keeps the connection alive until
    /// `disconnect` is called or a fatal error stops the reconnect policy.
    pub async fn run(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!("Client `run` called while already running");
            return;
        }
        while self.is_running.load(Ordering::Relaxed) {
            self.expected_disconnect.store(false, Ordering::Relaxed);

            match self.connect().await {
                Err(e) => error!("Failed to connect: {e:?}"),
                Ok(()) => {
                    let pinger = {
                        let client = self.clone();
                        tokio::spawn(async move { client.ping_loop().await })
                    };
                    if let Err(e) = self.read_loop().await {
                        warn!("Read loop exited with error: {e:?}");
                    }
                    pinger.abort();
                    self.cleanup_connection_state().await;
                }
            }

            let reconnect = self.config.reconnect
                && !self.expected_disconnect.load(Ordering::Relaxed)
                && self.session_state() != SessionState::Failed;
            if !reconnect {
                self.is_running.store(false, Ordering::Relaxed);
                break;
            }

            let error_count = self.auto_reconnect_errors.fetch_add(1, Ordering::SeqCst);
            let delay = Duration::from_secs(u64::from(error_count * 2).min(30));
            info!("Reconnecting in {delay:?} (attempt {})", error_count + 1);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown_notifier.notified() => {
                    self.is_running.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }
        info!("Client run loop has shut down");
    }

    /// Dials the transport and starts the login handshake.
    pub async fn connect(&self) -> Result<(), anyhow::Error> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyConnected.into());
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected.into());
        }

        let (transport, events_rx) = self.transport_factory.create_transport().await?;
        *self.transport.lock().await = Some(transport);
        *self.events_rx.lock().await = Some(events_rx);
        self.set_state(SessionState::HandshakeInit);

        self.start_login().await?;
        Ok(())
    }

    /// Closes the transport and signals the run loop to stop.
    pub async fn disconnect(&self) {
        info!("Disconnecting client intentionally");
        self.expected_disconnect.store(true, Ordering::Relaxed);
        self.is_running.store(false, Ordering::Relaxed);
        self.shutdown_notifier.notify_waiters();
        if let Some(transport) = self.transport.lock().await.as_ref() {
            transport.disconnect().await;
        }
        self.cleanup_connection_state().await;
    }

    async fn cleanup_connection_state(&self) {
        self.is_logged_in.store(false, Ordering::Relaxed);
        self.set_state(SessionState::Disconnected);
        *self.transport.lock().await = None;
        *self.events_rx.lock().await = None;
        *self.writer_key.lock().await = None;
        *self.reader_key.lock().await = None;
        *self.pending_writer.lock().await = None;
        self.fail_pending_requests().await;
    }

    /// Processes transport events until the stream ends. One frame is
    /// handled to completion before the next is read.
    pub async fn read_loop(&self) -> Result<(), anyhow::Error> {
        let mut events_rx = self
            .events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow::anyhow!("cannot start read loop: not connected"))?;

        let mut decoder = FrameDecoder::new();
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_notifier.notified() => {
                    info!(target: "Client", "Shutdown signaled, exiting read loop");
                    return Ok(());
                }
                event = events_rx.recv() => {
                    match event {
                        Some(TransportEvent::Connected) => {}
                        Some(TransportEvent::DataReceived(data)) => {
                            decoder.feed(&data);
                            while let Some(frame) = decoder.next_frame() {
                                self.process_frame(frame).await?;
                            }
                        }
                        Some(TransportEvent::Disconnected) | None => {
                            let expected = self.expected_disconnect.load(Ordering::Relaxed);
                            self.dispatch_event(Event::Disconnected(Disconnected {
                                reconnecting: !expected && self.config.reconnect,
                            }));
                            if expected {
                                info!("Transport ended as expected");
                                return Ok(());
                            }
                            return Err(anyhow::anyhow!("transport ended unexpectedly"));
                        }
                    }
                }
            }
        }
    }

    pub(crate) async fn process_frame(&self, frame: Frame) -> Result<(), anyhow::Error> {
        let payload = if frame.encrypted {
            let decoded = {
                let mut reader_guard = self.reader_key.lock().await;
                let reader = reader_guard.as_mut().ok_or_else(|| {
                    anyhow::anyhow!("received an encrypted frame before keys were negotiated")
                })?;
                reader.decode(&frame.body)
            };
            match decoded {
                Ok(payload) => payload,
                Err(e) => {
                    error!(target: "Client/Recv", "Frame MAC rejected: {e}");
                    self.dispatch_event(Event::StreamError(StreamError {
                        code: "mac-mismatch".to_string(),
                        raw: None,
                    }));
                    self.disconnect().await;
                    return Err(e.into());
                }
            }
        } else {
            frame.body.to_vec()
        };

        match binary::unmarshal(&payload) {
            Ok(node) => {
                self.process_node(node).await;
                Ok(())
            }
            Err(e) => {
                error!(target: "Client/Recv", "Failed to unmarshal node: {e}");
                self.dispatch_event(Event::StreamError(StreamError {
                    code: "malformed-frame".to_string(),
                    raw: None,
                }));
                self.disconnect().await;
                Err(e.into())
            }
        }
    }

    pub(crate) async fn process_node(&self, node: Node) {
        debug!(target: "Client/Recv", "{node}");

        match node.tag.as_str() {
            "challenge" => self.handle_challenge(&node).await,
            "success" => self.handle_success(&node).await,
            "failure" => self.handle_failure(&node).await,
            "stream:error" => self.handle_stream_error(&node).await,
            "iq" => self.handle_iq(&node).await,
            "message" => self.handle_message(node).await,
            "receipt" => self.handle_receipt(&node).await,
            "ack" => self.handle_ack(&node).await,
            "notification" => self.handle_notification(&node).await,
            "presence" => self.handle_presence(&node).await,
            "chatstate" => self.handle_chatstate(&node).await,
            "ib" => self.handle_ib(&node).await,
            _ => {
                warn!(target: "Client", "Received unknown top-level node: {node}");
            }
        }
    }

    async fn handle_iq(&self, node: &Node) {
        if self.handle_media_response(node).await {
            return;
        }
        if self.handle_pre_key_response(node).await {
            return;
        }
        if self.handle_tracked_response(node).await {
            return;
        }
        if self.handle_server_iq(node).await {
            return;
        }
        warn!(target: "Client", "Received unhandled IQ: {node}");
    }

    async fn handle_ack(&self, node: &Node) {
        if self.handle_tracked_response(node).await {
            return;
        }
        let mut attrs = node.attrs();
        let id = attrs.required_string("id").to_string();
        let class = attrs.optional_string("class").map(str::to_string);
        self.dispatch_event(Event::ServerAck(crate::types::events::ServerAck {
            id,
            class,
        }));
    }

    async fn handle_stream_error(&self, node: &Node) {
        self.is_logged_in.store(false, Ordering::Relaxed);
        let code = node
            .attrs()
            .optional_string("code")
            .unwrap_or_default()
            .to_string();
        error!(target: "Client", "Stream error: {node}");
        self.dispatch_event(Event::StreamError(StreamError {
            code,
            raw: Some(node.clone()),
        }));
        self.expected_disconnect.store(true, Ordering::Relaxed);
        self.shutdown_notifier.notify_waiters();
    }

    /// Marshals and frames a node, encrypting when the writer keystream is
    /// installed, then writes it to the transport.
    pub async fn send_node(&self, node: Node) -> Result<(), ClientError> {
        let transport = {
            let guard = self.transport.lock().await;
            guard.clone().ok_or(ClientError::NotConnected)?
        };

        debug!(target: "Client/Send", "{node}");
        let payload = binary::marshal(&node)?;

        let framed = {
            let mut writer_guard = self.writer_key.lock().await;
            match writer_guard.as_mut() {
                Some(writer) => {
                    let body = writer.encode(&payload);
                    encode_frame(&body, true, None)?
                }
                None => encode_frame(&payload, false, None)?,
            }
        };

        transport
            .send(&framed)
            .await
            .map_err(|e| ClientError::Socket(SocketError::Transport(e.to_string())))?;
        Ok(())
    }

    /// Sends raw prologue bytes, bypassing framing. Only the stream opener
    /// uses this.
    pub(crate) async fn send_raw(&self, data: &[u8]) -> Result<(), ClientError> {
        let transport = {
            let guard = self.transport.lock().await;
            guard.clone().ok_or(ClientError::NotConnected)?
        };
        transport
            .send(data)
            .await
            .map_err(|e| ClientError::Socket(SocketError::Transport(e.to_string())))?;
        Ok(())
    }

    pub(crate) fn reset_reconnect_backoff(&self) {
        self.auto_reconnect_errors.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{test_config, test_harness};

    #[tokio::test]
    async fn test_message_ids_are_strictly_distinct() {
        let harness = test_harness(test_config());
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let id = harness.client.next_message_id("message");
            assert!(seen.insert(id), "message id repeated within the process");
        }
    }

    #[tokio::test]
    async fn test_send_node_requires_a_connection() {
        let harness = test_harness(test_config());
        let node = crate::binary::builder::NodeBuilder::new("presence").build();
        assert!(matches!(
            harness.client.send_node(node).await,
            Err(super::ClientError::NotConnected)
        ));
    }
}
