use chrono::Utc;
use log::{info, warn};

use crate::binary;
use crate::binary::builder::NodeBuilder;
use crate::binary::node::Node;
use crate::client::{Client, SessionState};
use crate::crypto::{derive_keys, KeyStream};
use crate::socket::framing::encode_frame;
use crate::store::challenge;
use crate::types::events::{Event, LoggedIn, LoginFailure};

const AUTH_MECHANISM: &str = "WAUTH-2";

impl Client {
    /// Opens the stream and sends the login preamble: prologue magic +
    /// stream header, a features node, and the `auth` node. With a cached
    /// challenge the auth already carries the authenticated blob, making
    /// login a single round trip.
    pub(crate) async fn start_login(&self) -> Result<(), anyhow::Error> {
        let stream_open =
            binary::marshal_stream_open(&self.config.server, &self.config.resource())?;
        // The magic goes raw on the wire; the opener itself is an ordinary
        // plaintext frame.
        let framed = encode_frame(&stream_open, false, Some(&binary::consts::MESSAGE_START[..]))?;
        self.send_raw(&framed).await?;

        self.send_node(build_features_node()).await?;

        let cached = match challenge::load(&self.config.challenge_file).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(target: "Client/Login", "Could not read challenge file: {e}");
                None
            }
        };

        let auth = match cached {
            Some(nonce) => {
                let blob = self.install_keys_and_seal(&nonce).await?;
                *self.pending_challenge.lock().await = Some(nonce);
                self.build_auth_node(Some(blob))
            }
            None => self.build_auth_node(None),
        };

        // The writer keystream is still parked, so this frame (like every
        // frame until `success`) goes out plaintext; only the blob payload
        // is ciphered.
        self.send_node(auth).await?;
        self.set_state(SessionState::AwaitingChallengeOrSuccess);
        Ok(())
    }

    /// Fresh nonce from the server: derive keys, answer with the sealed
    /// identity blob.
    pub(crate) async fn handle_challenge(&self, node: &Node) {
        let Some(nonce) = node.bytes().map(<[u8]>::to_vec) else {
            warn!(target: "Client/Login", "Challenge node carried no nonce");
            return;
        };

        let blob = match self.install_keys_and_seal(&nonce).await {
            Ok(blob) => blob,
            Err(e) => {
                self.dispatch_event(Event::LoginFailure(LoginFailure {
                    reason: format!("key derivation failed: {e}"),
                }));
                self.set_state(SessionState::Failed);
                return;
            }
        };
        *self.pending_challenge.lock().await = Some(nonce);

        let response = NodeBuilder::new("response").bytes(blob).build();
        if let Err(e) = self.send_node(response).await {
            warn!(target: "Client/Login", "Failed to send challenge response: {e}");
            return;
        }
        self.set_state(SessionState::AwaitingSuccess);
    }

    pub(crate) async fn handle_success(&self, _node: &Node) {
        // Persist the nonce before the state machine advances; a crash here
        // must not leave a logged-in session with an unpersisted challenge.
        if let Some(nonce) = self.pending_challenge.lock().await.take() {
            if let Err(e) = challenge::persist(&self.config.challenge_file, &nonce).await {
                warn!(target: "Client/Login", "Failed to persist challenge: {e}");
            }
        }

        // Outbound encryption starts here; the blob already burned
        // sequence zero.
        if let Some(writer) = self.pending_writer.lock().await.take() {
            *self.writer_key.lock().await = Some(writer);
        }

        info!(target: "Client/Login", "Authenticated as {}", self.self_jid());
        self.set_state(SessionState::LoggedIn);
        self.is_logged_in
            .store(true, std::sync::atomic::Ordering::Relaxed);
        self.reset_reconnect_backoff();

        self.dispatch_event(Event::LoggedIn(LoggedIn {
            jid: self.self_jid().clone(),
        }));

        self.flush_send_queue().await;

        if let Err(e) = self.publish_pre_keys_if_needed().await {
            warn!(target: "Client/Encryption", "Pre-key publication failed: {e}");
        }
        if let Err(e) = self.send_available_presence().await {
            warn!(target: "Client/Login", "Could not announce presence: {e}");
        }
    }

    pub(crate) async fn handle_failure(&self, node: &Node) {
        let reason = node
            .attrs()
            .optional_string("reason")
            .unwrap_or("authentication rejected")
            .to_string();
        warn!(target: "Client/Login", "Login failed: {reason}");
        self.set_state(SessionState::Failed);
        self.dispatch_event(Event::LoginFailure(LoginFailure { reason }));
    }

    /// Derives the four session keys from the nonce and seals the identity
    /// blob with the writer stream (sequence zero). The reader goes live
    /// immediately, since the server's next frame is already encrypted;
    /// the writer stays parked until `success`.
    async fn install_keys_and_seal(&self, nonce: &[u8]) -> Result<Vec<u8>, anyhow::Error> {
        let keys = derive_keys(&self.config.password, nonce)?;
        let mut writer = KeyStream::new(&keys.write_cipher, &keys.write_mac);
        let reader = KeyStream::new(&keys.read_cipher, &keys.read_mac);

        let blob = writer.encode(&self.auth_blob_plaintext(nonce));

        *self.pending_writer.lock().await = Some(writer);
        *self.reader_key.lock().await = Some(reader);
        Ok(blob)
    }

    /// The cleartext half of the login blob:
    /// `[00 00 00 00] || msisdn || nonce || ts || user agent ||
    /// " MccMnc/<mcc><mnc>"`. The four zero bytes are mandatory; the
    /// server rejects a blob without them.
    fn auth_blob_plaintext(&self, nonce: &[u8]) -> Vec<u8> {
        let mut blob = Vec::new();
        blob.extend_from_slice(&[0u8; 4]);
        blob.extend_from_slice(self.config.msisdn.as_bytes());
        blob.extend_from_slice(nonce);
        blob.extend_from_slice(Utc::now().timestamp().to_string().as_bytes());
        blob.extend_from_slice(self.config.user_agent.as_bytes());
        blob.extend_from_slice(
            format!(" MccMnc/{}{}", self.config.mcc, self.config.mnc).as_bytes(),
        );
        blob
    }

    fn build_auth_node(&self, payload: Option<Vec<u8>>) -> Node {
        NodeBuilder::new("auth")
            .attr("mechanism", AUTH_MECHANISM)
            .attr("user", self.config.msisdn.clone())
            .apply_content(payload.map(binary::node::NodeContent::Bytes))
            .build()
    }
}

fn build_features_node() -> Node {
    NodeBuilder::new("stream:features")
        .children([
            NodeBuilder::new("readreceipts").build(),
            NodeBuilder::new("groups_v2").build(),
            NodeBuilder::new("privacy").build(),
            NodeBuilder::new("presence").build(),
        ])
        .build()
}
