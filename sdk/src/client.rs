//! Public async client.
//!
//! One driver task owns every piece of connection state and handles all
//! protocol work in response to I/O readiness: reliable-stream data,
//! datagrams, and timer ticks, multiplexed through `tokio::select!`. The
//! conversation is inherently serialized, so nothing here needs a lock;
//! commands and events cross task boundaries over channels.

use std::time::{Duration, Instant};

use async_channel::{unbounded, Receiver, Sender};
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, trace, warn};

use airband_protocol::{
    voice::{VoicePacket, MODERN_PING},
    CryptSetup, FrameDecoder, MessageId,
};

use crate::audio::{AudioRoute, Packetizer, SpeakingTracker};
use crate::crypto::{CryptState, CryptStats};
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::session::{Action, Session, SessionConfig, Step};
use crate::tcp::StreamWriter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Application-level keepalive period (reliable stream).
const PING_INTERVAL: Duration = Duration::from_secs(5);
/// Encrypted datagram keepalive period; exists to hold NAT mappings open.
const UDP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
/// Speaking-expiry scan granularity.
const TICK_INTERVAL: Duration = Duration::from_millis(100);
/// Quiet period on the datagram path before requesting a nonce resync,
/// and the minimum spacing between requests.
const RESYNC_AFTER: Duration = Duration::from_secs(5);

enum Command {
    MoveToChannel(u32),
    SetSelfMuteDeaf { mute: bool, deaf: bool },
    SendText {
        sessions: Vec<u32>,
        channels: Vec<u32>,
        trees: Vec<u32>,
        message: String,
    },
    SetVoiceTarget {
        id: u32,
        targets: Vec<airband_protocol::VoiceTargetItem>,
    },
    SendAudio {
        payload: Vec<u8>,
        target: u32,
        terminator: bool,
    },
    Disconnect,
}

/// Handle to one server connection.
pub struct Client {
    command_tx: Sender<Command>,
    event_rx: Receiver<ClientEvent>,
}

impl Client {
    /// Connect over plain TCP and a UDP socket aimed at the same remote
    /// endpoint.
    ///
    /// # Errors
    /// Returns an error when the transport cannot be established.
    pub async fn connect(addr: &str, config: SessionConfig) -> Result<Self, ClientError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout(format!("connecting to {addr}")))?
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        let peer = stream
            .peer_addr()
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        stream.set_nodelay(true).ok();
        info!("connected to {}", peer);
        Self::connect_with_stream(stream, peer, config).await
    }

    /// Connect over an already-established stream (e.g. a TLS session the
    /// caller set up); the datagram socket is aimed at `peer`.
    ///
    /// # Errors
    /// Returns an error when the datagram socket cannot be bound.
    pub async fn connect_with_stream<S>(
        stream: S,
        peer: std::net::SocketAddr,
        config: SessionConfig,
    ) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let udp = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| ClientError::ConnectionFailed(format!("UDP bind failed: {e}")))?;
        udp.connect(peer)
            .await
            .map_err(|e| ClientError::ConnectionFailed(format!("UDP connect failed: {e}")))?;

        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        let (read_half, write_half) = split(stream);
        let writer = StreamWriter::spawn(write_half);

        let mut session = Session::new(config);
        session.connecting();

        let driver = Driver {
            session,
            packetizer: Packetizer::new(false),
            speaking: SpeakingTracker::new(),
            crypt: None,
            udp_established: false,
            last_good: Instant::now(),
            last_resync_request: Instant::now(),
            decoder: FrameDecoder::new(),
            writer,
            udp,
            events: event_tx,
            commands: command_rx,
            epoch: Instant::now(),
        };
        tokio::spawn(driver.run(read_half));

        Ok(Self {
            command_tx,
            event_rx,
        })
    }

    /// Cloneable stream of connection events; the caller pumps it.
    #[must_use]
    pub fn events(&self) -> Receiver<ClientEvent> {
        self.event_rx.clone()
    }

    /// # Errors
    /// Returns [`ClientError::Disconnected`] once the driver is gone.
    pub async fn move_to_channel(&self, channel_id: u32) -> Result<(), ClientError> {
        self.command(Command::MoveToChannel(channel_id)).await
    }

    /// # Errors
    /// Returns [`ClientError::Disconnected`] once the driver is gone.
    pub async fn set_self_mute_deaf(&self, mute: bool, deaf: bool) -> Result<(), ClientError> {
        self.command(Command::SetSelfMuteDeaf { mute, deaf }).await
    }

    /// Send a text message to explicit session, channel, and tree targets.
    ///
    /// # Errors
    /// Returns [`ClientError::Disconnected`] once the driver is gone.
    pub async fn send_text(
        &self,
        sessions: Vec<u32>,
        channels: Vec<u32>,
        trees: Vec<u32>,
        message: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.command(Command::SendText {
            sessions,
            channels,
            trees,
            message: message.into(),
        })
        .await
    }

    /// Program one of the 30 addressable voice targets.
    ///
    /// # Errors
    /// Returns [`ClientError::Disconnected`] once the driver is gone.
    pub async fn set_voice_target(
        &self,
        id: u32,
        targets: Vec<airband_protocol::VoiceTargetItem>,
    ) -> Result<(), ClientError> {
        self.command(Command::SetVoiceTarget { id, targets }).await
    }

    /// Queue one opaque audio frame for transmission.
    ///
    /// # Errors
    /// Returns [`ClientError::Disconnected`] once the driver is gone.
    pub async fn send_audio(
        &self,
        payload: Vec<u8>,
        target: u32,
        terminator: bool,
    ) -> Result<(), ClientError> {
        self.command(Command::SendAudio {
            payload,
            target,
            terminator,
        })
        .await
    }

    /// # Errors
    /// Returns [`ClientError::Disconnected`] once the driver is gone.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Disconnect).await
    }

    async fn command(&self, command: Command) -> Result<(), ClientError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ClientError::Disconnected)
    }
}

struct Driver {
    session: Session,
    packetizer: Packetizer,
    speaking: SpeakingTracker,
    crypt: Option<CryptState>,
    /// Latches on the first datagram that decrypts successfully; until
    /// then audio prefers the reliable tunnel.
    udp_established: bool,
    last_good: Instant,
    last_resync_request: Instant,
    decoder: FrameDecoder,
    writer: StreamWriter,
    udp: UdpSocket,
    events: Sender<ClientEvent>,
    commands: Receiver<Command>,
    epoch: Instant,
}

impl Driver {
    async fn run<R>(mut self, mut reader: R)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        // Transport-level connect already completed; start the handshake.
        let step = self.session.begin_handshake();
        if self.apply_step(step).await.is_some() {
            return;
        }

        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + PING_INTERVAL,
            PING_INTERVAL,
        );
        let mut udp_keepalive = tokio::time::interval_at(
            tokio::time::Instant::now() + UDP_KEEPALIVE_INTERVAL,
            UDP_KEEPALIVE_INTERVAL,
        );
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        let mut stream_buf = [0u8; 8192];
        let mut udp_buf = [0u8; 1500];

        loop {
            let teardown = tokio::select! {
                result = reader.read(&mut stream_buf) => match result {
                    Ok(0) => Some("connection closed by peer".to_string()),
                    Ok(n) => self.on_stream_bytes(&stream_buf[..n]).await,
                    Err(e) => Some(format!("read error: {e}")),
                },
                result = self.udp.recv(&mut udp_buf) => match result {
                    Ok(n) => {
                        self.on_datagram(&udp_buf[..n]).await;
                        None
                    }
                    Err(e) => {
                        debug!("datagram receive error: {}", e);
                        None
                    }
                },
                command = self.commands.recv() => match command {
                    Ok(command) => self.on_command(command).await,
                    // All client handles dropped.
                    Err(_) => Some("client dropped".to_string()),
                },
                _ = ping.tick() => {
                    self.on_ping_tick().await;
                    None
                }
                _ = udp_keepalive.tick() => {
                    self.on_udp_keepalive().await;
                    None
                }
                _ = tick.tick() => {
                    self.on_speaking_tick().await;
                    None
                }
            };

            if let Some(reason) = teardown {
                self.teardown(reason).await;
                return;
            }
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn stats(&self) -> CryptStats {
        self.crypt.as_ref().map(CryptState::stats).unwrap_or_default()
    }

    /// Feed stream bytes through the frame decoder; returns a teardown
    /// reason on protocol violation or disconnect action.
    async fn on_stream_bytes(&mut self, bytes: &[u8]) -> Option<String> {
        self.decoder.extend(bytes);
        loop {
            match self.decoder.next_frame() {
                Ok(Some((ty, payload))) => {
                    if ty == MessageId::UdpTunnel.as_u16() {
                        // Tunneled voice: identical bytes to the datagram
                        // payload, already authenticated by the stream.
                        self.on_voice_payload(&payload).await;
                        continue;
                    }
                    let now_ms = self.now_ms();
                    let stats = self.stats();
                    match self.session.handle_frame(ty, &payload, now_ms, stats) {
                        Ok(step) => {
                            if let Some(reason) = self.apply_step(step).await {
                                return Some(reason);
                            }
                        }
                        Err(e) => return Some(format!("protocol violation: {e}")),
                    }
                }
                Ok(None) => return None,
                Err(e) => return Some(format!("protocol violation: {e}")),
            }
        }
    }

    async fn on_datagram(&mut self, wire: &[u8]) {
        let Some(crypt) = self.crypt.as_mut() else {
            trace!("datagram before key material, dropped");
            return;
        };
        let Some(plain) = crypt.decrypt(wire) else {
            // Expected under loss/duplication/reordering; never surfaced.
            trace!("datagram failed authentication, dropped");
            return;
        };
        self.last_good = Instant::now();
        if !self.udp_established {
            // First successful decrypt proves round-trip reachability.
            self.udp_established = true;
            debug!("datagram transport established");
        }
        self.on_voice_payload(&plain).await;
    }

    /// Decrypted datagram or tunneled payload: same bytes either way.
    async fn on_voice_payload(&mut self, payload: &[u8]) {
        match VoicePacket::parse(payload, self.session.modern_audio()) {
            Ok(VoicePacket::Ping) => {}
            Ok(VoicePacket::Audio {
                session, payload, ..
            }) => {
                if self.speaking.touch(session, Instant::now()) {
                    self.emit(ClientEvent::UserStartedSpeaking { session }).await;
                }
                self.emit(ClientEvent::AudioFrame { session, payload }).await;
            }
            Err(e) => {
                trace!("undecodable voice payload dropped: {}", e);
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Option<String> {
        match command {
            Command::MoveToChannel(channel_id) => {
                if let Some(frame) = self.session.move_to_channel(channel_id) {
                    return self.send_frame(frame);
                }
            }
            Command::SetSelfMuteDeaf { mute, deaf } => {
                if let Some(frame) = self.session.set_self_mute_deaf(mute, deaf) {
                    return self.send_frame(frame);
                }
            }
            Command::SendText {
                sessions,
                channels,
                trees,
                message,
            } => {
                let frame = self.session.send_text(sessions, channels, trees, message);
                return self.send_frame(frame);
            }
            Command::SetVoiceTarget { id, targets } => {
                if let Some(frame) = self.session.program_voice_target(id, targets) {
                    return self.send_frame(frame);
                }
                warn!("voice target slot {} out of range", id);
            }
            Command::SendAudio {
                payload,
                target,
                terminator,
            } => {
                let established = self.udp_established && self.crypt.is_some();
                let route = self.packetizer.build(
                    &payload,
                    target,
                    terminator,
                    established,
                    self.writer.saturated(),
                );
                match route {
                    AudioRoute::Datagram(bytes) => {
                        if let Some(crypt) = self.crypt.as_mut() {
                            let wire = crypt.encrypt(&bytes);
                            if let Err(e) = self.udp.send(&wire).await {
                                debug!("datagram send failed: {}", e);
                            }
                        }
                    }
                    AudioRoute::Tunnel(frame) => return self.send_frame(frame),
                    AudioRoute::Dropped => {}
                }
            }
            Command::Disconnect => return Some("disconnected by caller".to_string()),
        }
        None
    }

    async fn on_ping_tick(&mut self) {
        let frame = self.session.keepalive(self.now_ms(), self.stats());
        if self.writer.send(frame).is_err() {
            debug!("keepalive dropped, writer gone");
        }
        // Ask for a nonce resync when the datagram path has gone quiet.
        let now = Instant::now();
        if self.crypt.is_some()
            && now.duration_since(self.last_good) > RESYNC_AFTER
            && now.duration_since(self.last_resync_request) > RESYNC_AFTER
        {
            self.last_resync_request = now;
            debug!("requesting datagram nonce resync");
            let _ = self.writer.send(CryptSetup::default().to_frame());
        }
    }

    async fn on_udp_keepalive(&mut self) {
        let modern = self.session.modern_audio();
        let Some(crypt) = self.crypt.as_mut() else {
            return;
        };
        let ping = if modern {
            vec![MODERN_PING]
        } else {
            let mut w = airband_protocol::io::Writer::new();
            w.write_u8(airband_protocol::voice::LEGACY_PING << 5);
            w.write_varint(self.epoch.elapsed().as_millis() as u32);
            w.into_vec()
        };
        let wire = crypt.encrypt(&ping);
        if let Err(e) = self.udp.send(&wire).await {
            debug!("datagram keepalive failed: {}", e);
        }
    }

    async fn on_speaking_tick(&mut self) {
        for session in self.speaking.expire(Instant::now()) {
            self.emit(ClientEvent::UserStoppedSpeaking { session }).await;
        }
    }

    /// Apply a session step; returns a teardown reason if it demanded one.
    async fn apply_step(&mut self, step: Step) -> Option<String> {
        for event in step.events {
            if let ClientEvent::Ready { .. } = event {
                // Version negotiation is settled by now; start the audio
                // stream fresh in the agreed format.
                self.packetizer.reset(self.session.modern_audio());
            }
            self.emit(event).await;
        }
        for action in step.actions {
            match action {
                Action::Send(frame) => {
                    if let Some(reason) = self.send_frame(frame) {
                        return Some(reason);
                    }
                }
                Action::SetCrypt {
                    key,
                    encrypt_nonce,
                    decrypt_nonce,
                } => {
                    debug!("datagram key material installed");
                    self.crypt = Some(CryptState::new(key, encrypt_nonce, decrypt_nonce));
                    self.udp_established = false;
                    self.last_good = Instant::now();
                }
                Action::SetDecryptNonce(nonce) => {
                    if let Some(crypt) = self.crypt.as_mut() {
                        crypt.set_decrypt_nonce(nonce);
                    }
                }
                Action::SendEncryptNonce => {
                    if let Some(crypt) = self.crypt.as_ref() {
                        let reply = CryptSetup {
                            client_nonce: Some(crypt.encrypt_nonce().to_vec()),
                            ..Default::default()
                        };
                        if let Some(reason) = self.send_frame(reply.to_frame()) {
                            return Some(reason);
                        }
                    }
                }
                Action::Disconnect { reason } => return Some(reason),
            }
        }
        None
    }

    fn send_frame(&self, frame: Vec<u8>) -> Option<String> {
        match self.writer.send(frame) {
            Ok(()) => None,
            Err(_) => Some("stream writer gone".to_string()),
        }
    }

    async fn emit(&self, event: ClientEvent) {
        // Receiver may be gone; that only means nobody is listening.
        let _ = self.events.send(event).await;
    }

    /// Synchronous halt: timers stop with the loop, the datagram socket
    /// and crypto context die with the driver, and the outstanding
    /// lifecycle is reported as a disconnect event.
    async fn teardown(mut self, reason: String) {
        info!("disconnecting: {}", reason);
        self.crypt = None;
        self.udp_established = false;
        self.speaking.clear();
        let step = self.session.disconnect(reason);
        for event in step.events {
            self.emit(event).await;
        }
    }
}
