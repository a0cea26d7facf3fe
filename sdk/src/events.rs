use airband_protocol::RejectReason;

use crate::crypto::CryptStats;
use crate::model::{Channel, User};

/// Events emitted by the client as the connection and the authoritative
/// state change. Delivered through the stream returned by
/// [`crate::client::Client::events`]; the caller pumps it.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Server acknowledged authentication and finished the state
    /// download; the local session id is known from here on.
    Ready { session: u32 },
    /// Connection ended, from whichever state. All timers and the
    /// datagram transport are already torn down when this fires.
    Disconnected { reason: String },
    /// Server refused the connection. Fatal and not retried.
    Rejected { reason: RejectReason, text: String },

    UserJoined { user: User },
    UserUpdated { user: User },
    UserLeft { session: u32, reason: Option<String> },

    ChannelCreated { channel: Channel },
    ChannelUpdated { channel: Channel },
    ChannelRemoved { channel_id: u32 },

    TextMessage {
        actor: Option<u32>,
        message: String,
    },
    /// Non-fatal structured notice from the server.
    PermissionDenied {
        permission: Option<u32>,
        channel_id: Option<u32>,
        reason: Option<String>,
        deny_type: Option<u8>,
        /// Offending name for naming-related denials.
        name: Option<String>,
    },

    /// One decoded inbound audio frame; payload bytes are opaque to this
    /// crate (codec boundary).
    AudioFrame { session: u32, payload: Vec<u8> },
    UserStartedSpeaking { session: u32 },
    UserStoppedSpeaking { session: u32 },

    /// Round trip measured from an answered keepalive, with the datagram
    /// path's crypt statistics at that moment.
    PingResult { latency_ms: u64, stats: CryptStats },
}
