//! Connection state machine.
//!
//! `Session` is synchronous: the driver task feeds it decoded frames and
//! clock readings, and it answers with events for the caller plus actions
//! for the driver (frames to send, crypto state to install, teardown).
//! Keeping it free of I/O mirrors how the rest of the crate is tested.

use tracing::{debug, warn};

use airband_protocol::{
    framing::MessageId, version, Authenticate, ChannelRemove, ChannelState, CodecVersion,
    CryptSetup, PermissionDenied, Ping, Reject, ServerSync, TextMessage, UserRemove, UserState,
    Version, VoiceTarget, VoiceTargetItem, CURRENT_CHANNEL_TARGET, MAX_VOICE_TARGET,
};

use crate::crypto::{CryptStats, BLOCK_SIZE, KEY_SIZE};
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::model::{Channel, Roster, User};

/// Client release identity sent in the Version exchange.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub username: String,
    pub password: Option<String>,
    pub tokens: Vec<String>,
    pub release: String,
    pub os: String,
    pub os_version: String,
}

impl SessionConfig {
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
            tokens: Vec::new(),
            release: concat!("airband ", env!("CARGO_PKG_VERSION")).to_string(),
            os: std::env::consts::OS.to_string(),
            os_version: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

/// Side effects the driver must apply after a `Session` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write a complete frame to the reliable stream.
    Send(Vec<u8>),
    /// Install datagram key material, creating the crypto context.
    SetCrypt {
        key: [u8; KEY_SIZE],
        encrypt_nonce: [u8; BLOCK_SIZE],
        decrypt_nonce: [u8; BLOCK_SIZE],
    },
    /// Peer-driven resync: overwrite the datagram decrypt nonce.
    SetDecryptNonce([u8; BLOCK_SIZE]),
    /// Peer asked for our encrypt nonce; answer with a CryptSetup
    /// carrying it as-is.
    SendEncryptNonce,
    /// Tear the connection down.
    Disconnect { reason: String },
}

/// Result of feeding the session one frame (or lifecycle step).
#[derive(Debug, Default)]
pub struct Step {
    pub events: Vec<ClientEvent>,
    pub actions: Vec<Action>,
}

impl Step {
    fn send(&mut self, frame: Vec<u8>) {
        self.actions.push(Action::Send(frame));
    }
}

pub struct Session {
    state: SessionState,
    config: SessionConfig,
    session_id: Option<u32>,
    roster: Roster,
    /// Negotiated wire-format class; gates the audio packet formats.
    modern_audio: bool,
    max_bandwidth: Option<u32>,
    /// Server-announced codec selection, recorded as-is.
    codec: Option<CodecVersion>,
}

impl Session {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            state: SessionState::Disconnected,
            config,
            session_id: None,
            roster: Roster::default(),
            modern_audio: false,
            max_bandwidth: None,
            codec: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    /// Whether the negotiated version selects the tagged audio formats.
    #[must_use]
    pub fn modern_audio(&self) -> bool {
        self.modern_audio
    }

    /// Server-imposed bandwidth cap, once synchronized.
    #[must_use]
    pub fn max_bandwidth(&self) -> Option<u32> {
        self.max_bandwidth
    }

    /// Last codec announcement from the server, if any.
    #[must_use]
    pub fn codec(&self) -> Option<&CodecVersion> {
        self.codec.as_ref()
    }

    #[must_use]
    pub fn users(&self) -> &std::collections::HashMap<u32, User> {
        &self.roster.users
    }

    #[must_use]
    pub fn channels(&self) -> &std::collections::HashMap<u32, Channel> {
        &self.roster.channels
    }

    /// Mark the transport as connecting.
    pub fn connecting(&mut self) {
        self.state = SessionState::Connecting;
    }

    /// Transport-level connect completed: send Version and Authenticate,
    /// move to `Authenticating`. The driver starts the keepalive timer.
    pub fn begin_handshake(&mut self) -> Step {
        let mut step = Step::default();
        step.send(
            Version {
                version_legacy: Some(version::encode_legacy(1, 5, 0)),
                version_modern: Some(version::encode_modern(1, 5, 0)),
                release: Some(self.config.release.clone()),
                os: Some(self.config.os.clone()),
                os_version: Some(self.config.os_version.clone()),
            }
            .to_frame(),
        );
        step.send(
            Authenticate {
                username: Some(self.config.username.clone()),
                password: self.config.password.clone(),
                tokens: if self.config.tokens.is_empty() {
                    None
                } else {
                    Some(self.config.tokens.clone())
                },
                opus: Some(true),
            }
            .to_frame(),
        );
        self.state = SessionState::Authenticating;
        step
    }

    /// Build the periodic application-level keepalive.
    #[must_use]
    pub fn keepalive(&self, now_ms: u64, stats: CryptStats) -> Vec<u8> {
        Ping {
            timestamp: Some(now_ms),
            good: Some(stats.good),
            late: Some(stats.late),
            lost: Some(stats.lost),
            resync: Some(stats.resync),
        }
        .to_frame()
    }

    /// Explicit or transport-driven disconnect from any state.
    pub fn disconnect(&mut self, reason: impl Into<String>) -> Step {
        let mut step = Step::default();
        if self.state != SessionState::Disconnected {
            step.events.push(ClientEvent::Disconnected {
                reason: reason.into(),
            });
        }
        self.state = SessionState::Disconnected;
        self.session_id = None;
        self.modern_audio = false;
        self.max_bandwidth = None;
        self.codec = None;
        self.roster.clear();
        step
    }

    /// Feed one inbound control frame.
    ///
    /// `stats` is the datagram path's current crypt statistics, used only
    /// for ping bookkeeping.
    ///
    /// # Errors
    /// Returns an error on malformed message bodies; the connection must
    /// be closed (protocol violation).
    pub fn handle_frame(
        &mut self,
        ty: u16,
        payload: &[u8],
        now_ms: u64,
        stats: CryptStats,
    ) -> Result<Step, ClientError> {
        let Some(id) = MessageId::from_u16(ty) else {
            debug!("ignoring unknown message type {}", ty);
            return Ok(Step::default());
        };

        let mut step = Step::default();
        match id {
            MessageId::Version => {
                let msg = Version::decode(payload)?;
                let modern = msg
                    .version_modern
                    .or_else(|| msg.version_legacy.map(version::legacy_to_modern));
                if let Some(v) = modern {
                    self.modern_audio = version::supports_modern_audio(v);
                    debug!(
                        "server version 0x{:016x}, modern audio: {}",
                        v, self.modern_audio
                    );
                }
            }
            MessageId::Reject => {
                let msg = Reject::decode(payload)?;
                let reason = msg.reason.unwrap_or_default();
                let text = msg.text.unwrap_or_default();
                warn!("server rejected connection: {:?} {}", reason, text);
                step.events.push(ClientEvent::Rejected { reason, text });
                step.actions.push(Action::Disconnect {
                    reason: "rejected by server".to_string(),
                });
            }
            MessageId::ServerSync => {
                let msg = ServerSync::decode(payload)?;
                if let Some(session) = msg.session {
                    self.session_id = Some(session);
                    self.max_bandwidth = msg.max_bandwidth;
                    self.state = SessionState::Ready;
                    step.events.push(ClientEvent::Ready { session });
                    // Arm the "whisper to current channel" target now that
                    // the local user is identified.
                    if let Some(frame) = self.whisper_target_frame() {
                        step.send(frame);
                    }
                }
            }
            MessageId::ChannelState => {
                let msg = ChannelState::decode(payload)?;
                let created = !self.roster.channels.contains_key(&msg.channel_id);
                let channel = self
                    .roster
                    .channels
                    .entry(msg.channel_id)
                    .or_insert_with(|| Channel::new(msg.channel_id));
                channel.apply(&msg);
                let channel = channel.clone();
                step.events.push(if created {
                    ClientEvent::ChannelCreated { channel }
                } else {
                    ClientEvent::ChannelUpdated { channel }
                });
            }
            MessageId::ChannelRemove => {
                let msg = ChannelRemove::decode(payload)?;
                if self.roster.channels.remove(&msg.channel_id).is_some() {
                    step.events.push(ClientEvent::ChannelRemoved {
                        channel_id: msg.channel_id,
                    });
                }
            }
            MessageId::UserState => {
                let msg = UserState::decode(payload)?;
                let created = !self.roster.users.contains_key(&msg.session);
                let user = self
                    .roster
                    .users
                    .entry(msg.session)
                    .or_insert_with(|| User::new(msg.session));
                let before_channel = user.channel_id;
                user.apply(&msg);
                let user = user.clone();
                let own = self.session_id == Some(msg.session);
                let channel_changed = created || user.channel_id != before_channel;
                step.events.push(if created {
                    ClientEvent::UserJoined { user }
                } else {
                    ClientEvent::UserUpdated { user }
                });
                if own && channel_changed {
                    if let Some(frame) = self.whisper_target_frame() {
                        step.send(frame);
                    }
                }
            }
            MessageId::UserRemove => {
                let msg = UserRemove::decode(payload)?;
                if self.roster.users.remove(&msg.session).is_some() {
                    step.events.push(ClientEvent::UserLeft {
                        session: msg.session,
                        reason: msg.reason,
                    });
                }
            }
            MessageId::TextMessage => {
                let msg = TextMessage::decode(payload)?;
                step.events.push(ClientEvent::TextMessage {
                    actor: msg.actor,
                    message: msg.message.unwrap_or_default(),
                });
            }
            MessageId::PermissionDenied => {
                let msg = PermissionDenied::decode(payload)?;
                step.events.push(ClientEvent::PermissionDenied {
                    permission: msg.permission,
                    channel_id: msg.channel_id,
                    reason: msg.reason,
                    deny_type: msg.deny_type,
                    name: msg.name,
                });
            }
            MessageId::CryptSetup => {
                let msg = CryptSetup::decode(payload)?;
                self.handle_crypt_setup(msg, &mut step)?;
            }
            MessageId::Ping => {
                let msg = Ping::decode(payload)?;
                if let Some(ts) = msg.timestamp {
                    // Pings are observed, never answered.
                    step.events.push(ClientEvent::PingResult {
                        latency_ms: now_ms.saturating_sub(ts),
                        stats,
                    });
                }
            }
            MessageId::CodecVersion => {
                let msg = CodecVersion::decode(payload)?;
                debug!("server codec announcement: opus {:?}", msg.opus);
                self.codec = Some(msg);
            }
            other => {
                // Known but uninteresting to this client (server config,
                // ACLs, user stats, ...).
                debug!("ignoring {:?}", other);
            }
        }
        Ok(step)
    }

    fn handle_crypt_setup(&self, msg: CryptSetup, step: &mut Step) -> Result<(), ClientError> {
        fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], ClientError> {
            bytes.try_into().map_err(|_| {
                ClientError::Protocol(airband_protocol::ProtocolError::Malformed(
                    "crypt material with wrong length",
                ))
            })
        }

        match (&msg.key, &msg.client_nonce, &msg.server_nonce) {
            (Some(key), Some(client_nonce), Some(server_nonce)) => {
                step.actions.push(Action::SetCrypt {
                    key: fixed(key)?,
                    encrypt_nonce: fixed(client_nonce)?,
                    decrypt_nonce: fixed(server_nonce)?,
                });
            }
            (None, None, Some(server_nonce)) => {
                step.actions.push(Action::SetDecryptNonce(fixed(server_nonce)?));
            }
            (None, None, None) => {
                // Empty CryptSetup is a request for our encrypt nonce.
                step.actions.push(Action::SendEncryptNonce);
            }
            _ => {
                debug!("ignoring partial crypt setup");
            }
        }
        Ok(())
    }

    /// Frame programming target slot 1 to the local user's channel, with
    /// link and child expansion off.
    fn whisper_target_frame(&self) -> Option<Vec<u8>> {
        let session = self.session_id?;
        let channel = self.roster.users.get(&session)?.channel_id;
        Some(
            VoiceTarget {
                id: CURRENT_CHANNEL_TARGET,
                targets: Some(vec![VoiceTargetItem {
                    channel_id: Some(channel),
                    links: Some(false),
                    children: Some(false),
                    ..Default::default()
                }]),
            }
            .to_frame(),
        )
    }

    // ---- outbound command builders -------------------------------------

    /// Request moving the local user to `channel_id`.
    #[must_use]
    pub fn move_to_channel(&self, channel_id: u32) -> Option<Vec<u8>> {
        let session = self.session_id?;
        Some(
            UserState {
                session,
                channel_id: Some(channel_id),
                ..Default::default()
            }
            .to_frame(),
        )
    }

    /// Set the local user's self-imposed mute/deaf flags.
    #[must_use]
    pub fn set_self_mute_deaf(&self, mute: bool, deaf: bool) -> Option<Vec<u8>> {
        let session = self.session_id?;
        Some(
            UserState {
                session,
                self_mute: Some(mute),
                self_deaf: Some(deaf),
                ..Default::default()
            }
            .to_frame(),
        )
    }

    /// Send a text message to explicit session, channel, and tree targets.
    #[must_use]
    pub fn send_text(
        &self,
        sessions: Vec<u32>,
        channels: Vec<u32>,
        trees: Vec<u32>,
        message: impl Into<String>,
    ) -> Vec<u8> {
        TextMessage {
            actor: None,
            sessions: if sessions.is_empty() { None } else { Some(sessions) },
            channels: if channels.is_empty() { None } else { Some(channels) },
            trees: if trees.is_empty() { None } else { Some(trees) },
            message: Some(message.into()),
        }
        .to_frame()
    }

    /// Program one of the 30 addressable voice targets.
    #[must_use]
    pub fn program_voice_target(&self, id: u32, targets: Vec<VoiceTargetItem>) -> Option<Vec<u8>> {
        if id == 0 || id > MAX_VOICE_TARGET {
            return None;
        }
        Some(
            VoiceTarget {
                id,
                targets: Some(targets),
            }
            .to_frame(),
        )
    }
}
