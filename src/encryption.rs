use chrono::Utc;
use log::{debug, info, warn};
use rand::Rng;

use crate::axolotl::{
    self, cipher, generate_pre_keys, generate_registration_id, AxolotlError, IdentityKeyPair,
    MessageType, PendingPreKey, PreKeyBundle, PreKeySignalMessage, SessionRecord,
};
use crate::binary::builder::NodeBuilder;
use crate::binary::node::Node;
use crate::client::{Client, ClientError};
use crate::store::LocalIdentity;
use crate::types::events::{EncryptionUnavailable, Event, Typing};
use crate::types::message::{MessageInfo, TextMessage};
use crate::types::presence::ChatState;
use crate::types::Jid;

const ENCRYPT_NAMESPACE: &str = "encrypt";

fn be24(value: u32) -> Vec<u8> {
    vec![(value >> 16) as u8, (value >> 8) as u8, value as u8]
}

fn read_u24(bytes: &[u8]) -> Option<u32> {
    let bytes: [u8; 3] = bytes.try_into().ok()?;
    Some(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
}

fn key_id_node(tag: &str, id: u32, value: &[u8]) -> Node {
    NodeBuilder::new(tag)
        .children([
            NodeBuilder::new("id").bytes(be24(id)).build(),
            NodeBuilder::new("value").bytes(value.to_vec()).build(),
        ])
        .build()
}

impl Client {
    /// First login after a fresh registration: mint the identity, the
    /// one-time pre-key pool and the signed pre-key, persist everything,
    /// then publish to the server.
    pub(crate) async fn publish_pre_keys_if_needed(&self) -> Result<(), ClientError> {
        let existing = self
            .key_store
            .local_identity()
            .await
            .map_err(|e| ClientError::Encryption(e.to_string()))?;
        if existing.is_some() {
            return Ok(());
        }

        info!(target: "Client/Encryption", "No local identity, generating and publishing pre-keys");
        let identity = IdentityKeyPair::generate();
        let registration_id = generate_registration_id();
        self.key_store
            .store_local_identity(registration_id, &identity)
            .await
            .map_err(|e| ClientError::Encryption(e.to_string()))?;

        let pre_keys = generate_pre_keys(axolotl::PRE_KEY_TARGET);
        for record in &pre_keys {
            self.key_store
                .store_pre_key(record.id, record)
                .await
                .map_err(|e| ClientError::Encryption(e.to_string()))?;
        }

        let signed_id = rand::thread_rng().gen_range(1..(1u32 << 24));
        let signed = axolotl::SignedPreKeyRecord::generate(
            signed_id,
            &identity,
            Utc::now().timestamp(),
        );
        self.key_store
            .store_signed_pre_key(signed.id, &signed)
            .await
            .map_err(|e| ClientError::Encryption(e.to_string()))?;

        self.send_pre_key_publication(&identity, registration_id, &pre_keys, Some(&signed))
            .await
    }

    /// The server reported a shrinking pre-key pool: top it back up without
    /// touching the identity.
    pub(crate) async fn handle_encrypt_notification(&self, node: &Node) {
        let remaining = node
            .get_optional_child("count")
            .and_then(|c| {
                let mut attrs = c.attrs();
                attrs.optional_u64("value")
            })
            .unwrap_or(0) as usize;
        if remaining >= axolotl::PRE_KEY_TARGET {
            return;
        }

        let identity = match self.key_store.local_identity().await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                warn!(target: "Client/Encryption", "Replenish requested but no identity exists");
                return;
            }
            Err(e) => {
                warn!(target: "Client/Encryption", "Key store failure during replenish: {e}");
                return;
            }
        };

        let missing = axolotl::PRE_KEY_TARGET - remaining;
        info!(target: "Client/Encryption", "Replenishing {missing} pre-key(s)");
        let pre_keys = generate_pre_keys(missing);
        for record in &pre_keys {
            if let Err(e) = self.key_store.store_pre_key(record.id, record).await {
                warn!(target: "Client/Encryption", "Could not persist pre-key {}: {e}", record.id);
                return;
            }
        }
        if let Err(e) = self
            .send_pre_key_publication(
                &identity.identity_key_pair,
                identity.registration_id,
                &pre_keys,
                None,
            )
            .await
        {
            warn!(target: "Client/Encryption", "Replenish publication failed: {e}");
        }
    }

    async fn send_pre_key_publication(
        &self,
        identity: &IdentityKeyPair,
        registration_id: u32,
        pre_keys: &[axolotl::PreKeyRecord],
        signed: Option<&axolotl::SignedPreKeyRecord>,
    ) -> Result<(), ClientError> {
        let key_nodes = pre_keys
            .iter()
            .map(|record| key_id_node("key", record.id, &record.key_pair.public))
            .collect::<Vec<_>>();

        let mut children = vec![
            NodeBuilder::new("identity")
                .bytes(identity.public().to_vec())
                .build(),
            NodeBuilder::new("registration")
                .bytes(registration_id.to_be_bytes().to_vec())
                .build(),
            NodeBuilder::new("type")
                .bytes(vec![axolotl::KEY_TYPE_DJB])
                .build(),
            NodeBuilder::new("list").children(key_nodes).build(),
        ];
        if let Some(signed) = signed {
            let mut skey = key_id_node("skey", signed.id, &signed.key_pair.public);
            if let Some(crate::binary::node::NodeContent::Nodes(nodes)) = &mut skey.content {
                nodes.push(
                    NodeBuilder::new("signature")
                        .bytes(signed.signature.clone())
                        .build(),
                );
            }
            children.push(skey);
        }

        let node = NodeBuilder::new("iq")
            .attr("id", self.next_message_id("encrypt"))
            .attr("type", "set")
            .attr("to", self.server_jid().to_string())
            .attr("xmlns", ENCRYPT_NAMESPACE)
            .children(children)
            .build();
        self.send_node(node).await
    }

    /// Sends a message end-to-end encrypted, fetching the recipient's keys
    /// first when no session exists yet. Returns the message id when the
    /// message went out immediately, `None` when it is queued behind a key
    /// fetch.
    pub async fn send_encrypted_message(
        &self,
        to: &str,
        body: &str,
    ) -> Result<Option<String>, ClientError> {
        let jid = Jid::from_msisdn(to);
        let jid_str = jid.to_string();

        if self.skip_encryption.lock().await.contains(&jid_str) {
            debug!(target: "Client/Encryption", "{jid_str} has no keys, sending plaintext");
            return self.send_message(to, body).await.map(Some);
        }

        if !self.cipher_sessions.lock().await.contains_key(&jid_str) {
            match self
                .key_store
                .load_session(&jid_str, axolotl::DEVICE_ID)
                .await
            {
                Ok(Some(record)) => {
                    self.cipher_sessions
                        .lock()
                        .await
                        .insert(jid_str.clone(), record);
                }
                Ok(None) => {
                    self.pending_plaintext
                        .lock()
                        .await
                        .entry(jid_str.clone())
                        .or_default()
                        .push(body.to_string());
                    self.request_pre_keys(vec![jid]).await?;
                    return Ok(None);
                }
                Err(e) => return Err(ClientError::Encryption(e.to_string())),
            }
        }

        self.encrypt_and_send(&jid, body).await.map(Some)
    }

    /// Fetches pre-key bundles for recipients we have no session with.
    async fn request_pre_keys(&self, jids: Vec<Jid>) -> Result<(), ClientError> {
        let id = self.next_message_id("keys");
        let users = jids
            .iter()
            .map(|jid| NodeBuilder::new("user").attr("jid", jid.to_string()).build())
            .collect::<Vec<_>>();

        self.pending_key_requests
            .lock()
            .await
            .insert(id.clone(), jids);

        let node = NodeBuilder::new("iq")
            .attr("id", id)
            .attr("xmlns", ENCRYPT_NAMESPACE)
            .attr("type", "get")
            .attr("to", self.server_jid().to_string())
            .children([NodeBuilder::new("key").children(users).build()])
            .build();
        self.send_node(node).await
    }

    /// Encrypts on the cached session and sends. The mutated session is
    /// written back to the store before the frame goes out.
    async fn encrypt_and_send(&self, to: &Jid, body: &str) -> Result<String, ClientError> {
        let identity = self
            .local_identity_required()
            .await
            .map_err(|e| ClientError::Encryption(e.to_string()))?;
        let jid_str = to.to_string();

        let wire = {
            let mut sessions = self.cipher_sessions.lock().await;
            let session = sessions
                .get_mut(&jid_str)
                .ok_or_else(|| ClientError::Encryption("session vanished from cache".into()))?;
            let wire = cipher::encrypt(session, identity.registration_id, body.as_bytes())
                .map_err(|e| ClientError::Encryption(e.to_string()))?;
            if let Err(e) = self
                .key_store
                .store_session(&jid_str, axolotl::DEVICE_ID, session)
                .await
            {
                warn!(target: "Client/Encryption", "Could not persist session for {jid_str}: {e}");
            }
            wire
        };

        let enc = NodeBuilder::new("enc")
            .attr("v", "1")
            .attr("type", wire.message_type.as_str())
            .attr("av", self.config.app_version.clone())
            .bytes(wire.data)
            .build();
        self.send_message_node(to.clone(), "text", vec![enc]).await
    }

    /// Resolves a pre-key fetch: build sessions for every answered user,
    /// mark the silent ones as plaintext-only, then drain the pending
    /// queue for all requested recipients.
    pub(crate) async fn handle_pre_key_response(&self, node: &Node) -> bool {
        let Some(id) = node.attrs().optional_string("id") else {
            return false;
        };
        let Some(requested) = self.pending_key_requests.lock().await.remove(id) else {
            return false;
        };

        let identity = match self.local_identity_required().await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(target: "Client/Encryption", "No local identity for session setup: {e}");
                return true;
            }
        };

        for jid in &requested {
            let jid_str = jid.to_string();
            let bundle = node
                .get_optional_child("list")
                .and_then(|list| {
                    list.get_children_by_tag("user").into_iter().find(|u| {
                        u.attrs().optional_string("jid") == Some(jid_str.as_str())
                    })
                })
                .and_then(parse_bundle_node);

            match bundle {
                Some(bundle) if bundle.verify_signature() => {
                    let base_key = axolotl::KeyPair::generate();
                    let session = SessionRecord::initialize_alice(
                        &identity.identity_key_pair.key_pair,
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
                    if let Err(e) = self
                        .key_store
                        .store_session(&jid_str, axolotl::DEVICE_ID, &session)
                        .await
                    {
                        warn!(target: "Client/Encryption", "Could not persist new session: {e}");
                    }
                    self.cipher_sessions
                        .lock()
                        .await
                        .insert(jid_str.clone(), session);
                    debug!(target: "Client/Encryption", "Session established with {jid_str}");
                }
                Some(_) => {
                    warn!(
                        target: "Client/Encryption",
                        "Bundle signature for {jid_str} is invalid, falling back to plaintext"
                    );
                    self.mark_unencrypted(&jid_str).await;
                }
                None => {
                    debug!(
                        target: "Client/Encryption",
                        "Server has no keys for {jid_str}, falling back to plaintext"
                    );
                    self.mark_unencrypted(&jid_str).await;
                }
            }
        }

        for jid in &requested {
            self.drain_pending_plaintext(jid).await;
        }
        true
    }

    async fn mark_unencrypted(&self, jid_str: &str) {
        self.skip_encryption
            .lock()
            .await
            .insert(jid_str.to_string());
        if let Ok(jid) = jid_str.parse::<Jid>() {
            self.dispatch_event(Event::EncryptionUnavailable(EncryptionUnavailable { jid }));
        }
    }

    async fn drain_pending_plaintext(&self, jid: &Jid) {
        let jid_str = jid.to_string();
        let pending = self
            .pending_plaintext
            .lock()
            .await
            .remove(&jid_str)
            .unwrap_or_default();
        let has_session = self.cipher_sessions.lock().await.contains_key(&jid_str);

        for body in pending {
            let result = if has_session {
                self.encrypt_and_send(jid, &body).await.map(|_| ())
            } else {
                self.send_message(&jid_str, &body).await.map(|_| ())
            };
            if let Err(e) = result {
                warn!(target: "Client/Encryption", "Could not deliver queued message to {jid_str}: {e}");
            }
        }
    }

    /// Decrypts an inbound `<enc>` payload and emits the plaintext as an
    /// ordinary message event. Failures are logged and the message dropped;
    /// they are never fatal to the session.
    pub(crate) async fn handle_encrypted_message(&self, info: &MessageInfo, enc: &Node) {
        let Some(data) = enc.bytes() else {
            warn!(target: "Client/Encryption", "enc node without payload from {}", info.from);
            return;
        };
        let Some(message_type) = enc
            .attrs()
            .optional_string("type")
            .and_then(MessageType::from_str)
        else {
            warn!(target: "Client/Encryption", "enc node with unknown type from {}", info.from);
            return;
        };

        match self.decrypt_inbound(&info.from, message_type, data).await {
            Ok(plaintext) => {
                let body = String::from_utf8_lossy(&plaintext).into_owned();
                self.dispatch_event(Event::Typing(Typing {
                    from: info.author.clone().unwrap_or_else(|| info.from.clone()),
                    state: ChatState::Paused,
                }));
                self.dispatch_event(Event::Text(TextMessage {
                    info: info.clone(),
                    body,
                }));
            }
            Err(e) => {
                warn!(
                    target: "Client/Encryption",
                    "Dropping undecryptable {} from {}: {e}",
                    message_type.as_str(),
                    info.from
                );
            }
        }
    }

    async fn decrypt_inbound(
        &self,
        from: &Jid,
        message_type: MessageType,
        data: &[u8],
    ) -> Result<Vec<u8>, AxolotlError> {
        let jid_str = from.to_string();
        let mut sessions = self.cipher_sessions.lock().await;

        let plaintext = match message_type {
            MessageType::Msg => {
                if !sessions.contains_key(&jid_str) {
                    let stored = self
                        .key_store
                        .load_session(&jid_str, axolotl::DEVICE_ID)
                        .await
                        .map_err(|e| AxolotlError::Store(e.to_string()))?
                        .ok_or(AxolotlError::NoSession)?;
                    sessions.insert(jid_str.clone(), stored);
                }
                let session = sessions.get_mut(&jid_str).expect("session just ensured");
                cipher::decrypt(session, data)?
            }
            MessageType::PkMsg => {
                let parsed = PreKeySignalMessage::parse(data)?;
                let identity = self
                    .local_identity_required()
                    .await
                    .map_err(|e| AxolotlError::Store(e.to_string()))?;
                let signed = self
                    .key_store
                    .signed_pre_key(parsed.signed_pre_key_id)
                    .await
                    .map_err(|e| AxolotlError::Store(e.to_string()))?
                    .ok_or(AxolotlError::UnknownSignedPreKey(parsed.signed_pre_key_id))?;
                let one_time = match parsed.pre_key_id {
                    Some(id) => Some(
                        self.key_store
                            .pre_key(id)
                            .await
                            .map_err(|e| AxolotlError::Store(e.to_string()))?
                            .ok_or(AxolotlError::UnknownPreKey(id))?,
                    ),
                    None => None,
                };

                let mut session = SessionRecord::initialize_bob(
                    &identity.identity_key_pair.key_pair,
                    &signed.key_pair,
                    one_time.as_ref().map(|r| &r.key_pair),
                    parsed.identity_key,
                    parsed.base_key,
                    parsed.registration_id,
                );
                let plaintext = cipher::decrypt(&mut session, &parsed.message)?;

                // The one-time pre-key is burned once a session came out of
                // it.
                if let Some(used) = parsed.pre_key_id {
                    if let Err(e) = self.key_store.remove_pre_key(used).await {
                        warn!(target: "Client/Encryption", "Could not burn pre-key {used}: {e}");
                    }
                }
                sessions.insert(jid_str.clone(), session);
                plaintext
            }
        };

        let session = sessions.get(&jid_str).expect("session present");
        if let Err(e) = self
            .key_store
            .store_session(&jid_str, axolotl::DEVICE_ID, session)
            .await
        {
            warn!(target: "Client/Encryption", "Could not persist session for {jid_str}: {e}");
        }
        Ok(plaintext)
    }

    async fn local_identity_required(&self) -> Result<LocalIdentity, crate::store::StoreError> {
        match self.key_store.local_identity().await? {
            Some(identity) => Ok(identity),
            None => {
                let identity = IdentityKeyPair::generate();
                let registration_id = generate_registration_id();
                self.key_store
                    .store_local_identity(registration_id, &identity)
                    .await?;
                Ok(LocalIdentity {
                    registration_id,
                    identity_key_pair: identity,
                })
            }
        }
    }
}

fn parse_bundle_node(user: &Node) -> Option<PreKeyBundle> {
    fn bytes_of(node: Option<&Node>) -> Option<Vec<u8>> {
        node.and_then(|n| n.bytes()).map(<[u8]>::to_vec)
    }

    let registration_bytes = bytes_of(user.get_optional_child("registration"))?;
    let registration_id = u32::from_be_bytes(registration_bytes.try_into().ok()?);

    let identity_key: [u8; 32] = bytes_of(user.get_optional_child("identity"))?
        .try_into()
        .ok()?;

    let skey = user.get_optional_child("skey")?;
    let signed_pre_key_id = read_u24(&bytes_of(skey.get_optional_child("id"))?)?;
    let signed_pre_key: [u8; 32] = bytes_of(skey.get_optional_child("value"))?
        .try_into()
        .ok()?;
    let signed_pre_key_signature = bytes_of(skey.get_optional_child("signature"))?;

    let mut pre_key_id = None;
    let mut pre_key = None;
    if let Some(key) = user.get_optional_child("key") {
        if let (Some(id), Some(value)) = (
            bytes_of(key.get_optional_child("id")).and_then(|b| read_u24(&b)),
            bytes_of(key.get_optional_child("value")),
        ) {
            pre_key_id = Some(id);
            pre_key = value.try_into().ok();
        }
    }

    Some(PreKeyBundle {
        registration_id,
        identity_key,
        pre_key_id,
        pre_key,
        signed_pre_key_id,
        signed_pre_key,
        signed_pre_key_signature,
    })
}
