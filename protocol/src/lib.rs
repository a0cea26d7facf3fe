//! Wire protocol for the Airband voice client.
//!
//! Dependency-free building blocks shared by the SDK: control-channel
//! framing, presence-masked control messages, the datagram voice formats,
//! the protocol varint codec, and version negotiation helpers.

pub mod error;
pub mod framing;
pub mod io;
pub mod messages;
pub mod varint;
pub mod version;
pub mod voice;

pub use error::ProtocolError;
pub use framing::{encode_frame, FrameDecoder, MessageId, MAX_PAYLOAD};
pub use messages::{
    Authenticate, ChannelRemove, ChannelState, CodecVersion, CryptSetup, PermissionDenied, Ping,
    Reject, RejectReason, ServerSync, TextMessage, UserRemove, UserState, Version, VoiceTarget,
    VoiceTargetItem, CURRENT_CHANNEL_TARGET, MAX_VOICE_TARGET,
};
pub use voice::{AudioMessage, LegacyAudio, VoicePacket};
