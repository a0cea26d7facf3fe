//! Typed control message bodies.
//!
//! Every mutable field rides behind a presence mask: "field omitted" and
//! "field explicitly set to its zero value" are different wire states and
//! stay different after decode (`None` vs `Some(0)`). State merging
//! upstream relies on this and must never infer presence from a decoded
//! default.

use crate::error::ProtocolError;
use crate::framing::{encode_frame, MessageId};
use crate::io::{Reader, Writer};

/// Wire codec for one field inside a message body.
trait FieldCodec: Sized {
    fn write(&self, w: &mut Writer);
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError>;
}

impl FieldCodec for bool {
    fn write(&self, w: &mut Writer) {
        w.write_bool(*self);
    }
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        r.read_bool()
    }
}

impl FieldCodec for u8 {
    fn write(&self, w: &mut Writer) {
        w.write_u8(*self);
    }
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        r.read_u8()
    }
}

// 32-bit ids and counters travel as protocol varints.
impl FieldCodec for u32 {
    fn write(&self, w: &mut Writer) {
        w.write_varint(*self);
    }
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        r.read_varint()
    }
}

impl FieldCodec for u64 {
    fn write(&self, w: &mut Writer) {
        w.write_u64(*self);
    }
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        r.read_u64()
    }
}

impl FieldCodec for i32 {
    fn write(&self, w: &mut Writer) {
        w.write_i32(*self);
    }
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        r.read_i32()
    }
}

impl FieldCodec for String {
    fn write(&self, w: &mut Writer) {
        w.write_string(self);
    }
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        r.read_string()
    }
}

impl FieldCodec for Vec<u8> {
    fn write(&self, w: &mut Writer) {
        w.write_blob(self);
    }
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        r.read_bytes()
    }
}

impl FieldCodec for Vec<u32> {
    fn write(&self, w: &mut Writer) {
        debug_assert!(self.len() <= usize::from(u16::MAX));
        w.write_u16(self.len() as u16);
        for v in self {
            w.write_varint(*v);
        }
    }
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let count = r.read_u16()? as usize;
        let mut out = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            out.push(r.read_varint()?);
        }
        Ok(out)
    }
}

impl FieldCodec for Vec<String> {
    fn write(&self, w: &mut Writer) {
        debug_assert!(self.len() <= usize::from(u16::MAX));
        w.write_u16(self.len() as u16);
        for s in self {
            w.write_string(s);
        }
    }
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let count = r.read_u16()? as usize;
        let mut out = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            out.push(r.read_string()?);
        }
        Ok(out)
    }
}

macro_rules! control_message {
    (
        $(#[$meta:meta])*
        $name:ident : $id:ident {
            required { $($rf:ident : $rt:ty),* $(,)? }
            optional { $($of:ident : $ot:ty),* $(,)? }
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $name {
            $(pub $rf: $rt,)*
            $(pub $of: Option<$ot>,)*
        }

        impl $name {
            pub const ID: MessageId = MessageId::$id;

            #[must_use]
            pub fn encode(&self) -> Vec<u8> {
                let mut w = Writer::new();
                $(FieldCodec::write(&self.$rf, &mut w);)*
                let mut mask = 0u32;
                let mut bit = 0u32;
                $(
                    if self.$of.is_some() {
                        mask |= 1 << bit;
                    }
                    bit += 1;
                )*
                let _ = (&mut mask, &mut bit);
                w.write_u32(mask);
                $(
                    if let Some(v) = &self.$of {
                        FieldCodec::write(v, &mut w);
                    }
                )*
                w.into_vec()
            }

            /// # Errors
            /// Returns an error when the body is truncated or malformed.
            pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
                let mut r = Reader::new(payload);
                $(let $rf = <$rt as FieldCodec>::read(&mut r)?;)*
                let mask = r.read_u32()?;
                let mut bit = 0u32;
                $(
                    let $of = if mask & (1 << bit) != 0 {
                        Some(<$ot as FieldCodec>::read(&mut r)?)
                    } else {
                        None
                    };
                    bit += 1;
                )*
                let _ = (mask, &mut bit);
                Ok(Self { $($rf,)* $($of,)* })
            }

            /// Serialize as a complete control frame, ready for one write.
            #[must_use]
            pub fn to_frame(&self) -> Vec<u8> {
                encode_frame(Self::ID, &self.encode())
            }
        }
    };
}

control_message! {
    /// Version exchange; both encodings of the release version travel so
    /// old and new peers can negotiate. Modern wins when present.
    Version: Version {
        required {}
        optional {
            version_legacy: u32,
            version_modern: u64,
            release: String,
            os: String,
            os_version: String,
        }
    }
}

control_message! {
    Authenticate: Authenticate {
        required {}
        optional {
            username: String,
            password: String,
            tokens: Vec<String>,
            opus: bool,
        }
    }
}

control_message! {
    /// Application-level keepalive. Carries the sender's timestamp and
    /// its datagram crypt statistics.
    Ping: Ping {
        required {}
        optional {
            timestamp: u64,
            good: u32,
            late: u32,
            lost: u32,
            resync: u32,
        }
    }
}

control_message! {
    Reject: Reject {
        required {}
        optional {
            reason: RejectReason,
            text: String,
        }
    }
}

control_message! {
    /// Marks the end of authoritative state download; the assigned
    /// session id identifies the local user from here on.
    ServerSync: ServerSync {
        required {}
        optional {
            session: u32,
            max_bandwidth: u32,
            welcome_text: String,
            permissions: u64,
        }
    }
}

control_message! {
    ChannelRemove: ChannelRemove {
        required { channel_id: u32 }
        optional {}
    }
}

control_message! {
    ChannelState: ChannelState {
        required { channel_id: u32 }
        optional {
            parent: u32,
            name: String,
            description: String,
            temporary: bool,
            position: i32,
            max_users: u32,
            links: Vec<u32>,
            is_enter_restricted: bool,
            can_enter: bool,
        }
    }
}

control_message! {
    UserRemove: UserRemove {
        required { session: u32 }
        optional {
            actor: u32,
            reason: String,
            ban: bool,
        }
    }
}

control_message! {
    UserState: UserState {
        required { session: u32 }
        optional {
            actor: u32,
            name: String,
            user_id: u32,
            channel_id: u32,
            mute: bool,
            deaf: bool,
            suppress: bool,
            self_mute: bool,
            self_deaf: bool,
            comment: String,
            hash: String,
        }
    }
}

control_message! {
    /// Pure pass-through chat. Targets are explicit lists; a tree id
    /// addresses a channel and all its descendants.
    TextMessage: TextMessage {
        required {}
        optional {
            actor: u32,
            sessions: Vec<u32>,
            channels: Vec<u32>,
            trees: Vec<u32>,
            message: String,
        }
    }
}

control_message! {
    PermissionDenied: PermissionDenied {
        required {}
        optional {
            permission: u32,
            channel_id: u32,
            session: u32,
            reason: String,
            deny_type: u8,
            name: String,
        }
    }
}

control_message! {
    /// Datagram key material and nonce resync carrier. A message with no
    /// fields set is a request for the receiver's encrypt nonce; one
    /// carrying only `server_nonce` overwrites the receiver's decrypt
    /// nonce outright.
    CryptSetup: CryptSetup {
        required {}
        optional {
            key: Vec<u8>,
            client_nonce: Vec<u8>,
            server_nonce: Vec<u8>,
        }
    }
}

control_message! {
    CodecVersion: CodecVersion {
        required {}
        optional {
            alpha: i32,
            beta: i32,
            prefer_alpha: bool,
            opus: bool,
        }
    }
}

/// Typed rejection reason. Unknown codes survive decode as `Other` so a
/// newer server's reasons still reach the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RejectReason {
    #[default]
    None,
    WrongVersion,
    InvalidUsername,
    WrongUserPassword,
    WrongServerPassword,
    UsernameInUse,
    ServerFull,
    NoCertificate,
    AuthenticatorFail,
    Other(u8),
}

impl RejectReason {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            RejectReason::None => 0,
            RejectReason::WrongVersion => 1,
            RejectReason::InvalidUsername => 2,
            RejectReason::WrongUserPassword => 3,
            RejectReason::WrongServerPassword => 4,
            RejectReason::UsernameInUse => 5,
            RejectReason::ServerFull => 6,
            RejectReason::NoCertificate => 7,
            RejectReason::AuthenticatorFail => 8,
            RejectReason::Other(v) => v,
        }
    }

    #[must_use]
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => RejectReason::None,
            1 => RejectReason::WrongVersion,
            2 => RejectReason::InvalidUsername,
            3 => RejectReason::WrongUserPassword,
            4 => RejectReason::WrongServerPassword,
            5 => RejectReason::UsernameInUse,
            6 => RejectReason::ServerFull,
            7 => RejectReason::NoCertificate,
            8 => RejectReason::AuthenticatorFail,
            v => RejectReason::Other(v),
        }
    }
}

impl FieldCodec for RejectReason {
    fn write(&self, w: &mut Writer) {
        w.write_u8(self.as_u8());
    }
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        Ok(RejectReason::from_u8(r.read_u8()?))
    }
}

/// One routing rule inside a `VoiceTarget` message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceTargetItem {
    pub sessions: Option<Vec<u32>>,
    pub channel_id: Option<u32>,
    pub group: Option<String>,
    /// Also reach channels linked to the target channel.
    pub links: Option<bool>,
    /// Also reach the target channel's descendants.
    pub children: Option<bool>,
}

impl FieldCodec for VoiceTargetItem {
    fn write(&self, w: &mut Writer) {
        let mut mask = 0u8;
        if self.sessions.is_some() {
            mask |= 1;
        }
        if self.channel_id.is_some() {
            mask |= 1 << 1;
        }
        if self.group.is_some() {
            mask |= 1 << 2;
        }
        if self.links.is_some() {
            mask |= 1 << 3;
        }
        if self.children.is_some() {
            mask |= 1 << 4;
        }
        w.write_u8(mask);
        if let Some(v) = &self.sessions {
            FieldCodec::write(v, w);
        }
        if let Some(v) = &self.channel_id {
            FieldCodec::write(v, w);
        }
        if let Some(v) = &self.group {
            FieldCodec::write(v, w);
        }
        if let Some(v) = &self.links {
            FieldCodec::write(v, w);
        }
        if let Some(v) = &self.children {
            FieldCodec::write(v, w);
        }
    }

    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let mask = r.read_u8()?;
        Ok(Self {
            sessions: if mask & 1 != 0 {
                Some(FieldCodec::read(r)?)
            } else {
                None
            },
            channel_id: if mask & (1 << 1) != 0 {
                Some(r.read_varint()?)
            } else {
                None
            },
            group: if mask & (1 << 2) != 0 {
                Some(r.read_string()?)
            } else {
                None
            },
            links: if mask & (1 << 3) != 0 {
                Some(r.read_bool()?)
            } else {
                None
            },
            children: if mask & (1 << 4) != 0 {
                Some(r.read_bool()?)
            } else {
                None
            },
        })
    }
}

impl FieldCodec for Vec<VoiceTargetItem> {
    fn write(&self, w: &mut Writer) {
        debug_assert!(self.len() <= usize::from(u16::MAX));
        w.write_u16(self.len() as u16);
        for t in self {
            t.write(w);
        }
    }
    fn read(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let count = r.read_u16()? as usize;
        let mut out = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            out.push(VoiceTargetItem::read(r)?);
        }
        Ok(out)
    }
}

control_message! {
    /// Programs one of the 30 addressable whisper/shout targets.
    VoiceTarget: VoiceTarget {
        required { id: u32 }
        optional { targets: Vec<VoiceTargetItem> }
    }
}

/// Highest programmable voice target slot.
pub const MAX_VOICE_TARGET: u32 = 30;

/// Target slot reserved for "whisper to current channel".
pub const CURRENT_CHANNEL_TARGET: u32 = 1;
