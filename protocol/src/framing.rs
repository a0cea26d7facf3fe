//! Control-channel framing.
//!
//! The reliable stream carries discrete frames: a 6-byte header (2-byte
//! big-endian type code, 4-byte big-endian payload length) followed by
//! exactly that many payload bytes. [`FrameDecoder`] reassembles frames
//! from arbitrarily chunked input; [`encode_frame`] produces header and
//! payload as one buffer so the caller can issue a single write.

use crate::error::ProtocolError;

/// Frame header size on the wire.
pub const HEADER_LEN: usize = 6;

/// Maximum declared payload length. Anything larger is a protocol
/// violation and terminates the connection.
pub const MAX_PAYLOAD: usize = 0x7F_FFFF;

macro_rules! message_ids {
    ($($name:ident = $val:expr),* $(,)?) => {
        /// Control message type codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageId { $($name = $val,)* }

        impl MessageId {
            #[must_use]
            pub const fn as_u16(self) -> u16 { self as u16 }

            /// Maps a wire type code to a known message id.
            ///
            /// Unknown codes return `None`; callers ignore those frames
            /// for forward compatibility with newer peers.
            #[must_use]
            pub fn from_u16(value: u16) -> Option<Self> {
                match value {
                    $($val => Some(Self::$name),)*
                    _ => None,
                }
            }
        }
    };
}

message_ids! {
    Version = 0,
    UdpTunnel = 1,
    Authenticate = 2,
    Ping = 3,
    Reject = 4,
    ServerSync = 5,
    ChannelRemove = 6,
    ChannelState = 7,
    UserRemove = 8,
    UserState = 9,
    BanList = 10,
    TextMessage = 11,
    PermissionDenied = 12,
    Acl = 13,
    QueryUsers = 14,
    CryptSetup = 15,
    ContextActionModify = 16,
    ContextAction = 17,
    UserList = 18,
    VoiceTarget = 19,
    PermissionQuery = 20,
    CodecVersion = 21,
    UserStats = 22,
    RequestBlob = 23,
    ServerConfig = 24,
    SuggestConfig = 25,
    PluginData = 26,
}

/// Serialize one frame as a single contiguous buffer.
#[must_use]
pub fn encode_frame(id: MessageId, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD);
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&id.as_u16().to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Incremental frame reassembler.
///
/// Feed it byte chunks of any size; drain complete frames with
/// [`FrameDecoder::next_frame`]. Frame boundaries are preserved exactly
/// across chunk boundaries, and decoding restarts cleanly after every
/// emitted frame.
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append a chunk of stream bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// Returns the raw type code alongside the payload; unknown codes are
    /// the caller's forward-compatibility concern, not a decode error.
    ///
    /// # Errors
    /// Returns [`ProtocolError::OversizedFrame`] when a header declares a
    /// payload beyond [`MAX_PAYLOAD`]; the connection must be torn down.
    pub fn next_frame(&mut self) -> Result<Option<(u16, Vec<u8>)>, ProtocolError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let ty = u16::from_be_bytes([self.buf[0], self.buf[1]]);
        let len = u32::from_be_bytes([self.buf[2], self.buf[3], self.buf[4], self.buf[5]]) as usize;
        if len > MAX_PAYLOAD {
            return Err(ProtocolError::OversizedFrame { declared: len });
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        let payload = self.buf[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buf.drain(..HEADER_LEN + len);
        Ok(Some((ty, payload)))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_single_frame() {
        let frame = encode_frame(MessageId::Ping, &[1, 2, 3]);
        let mut dec = FrameDecoder::new();
        dec.extend(&frame);
        let (ty, payload) = dec.next_frame().unwrap().unwrap();
        assert_eq!(ty, MessageId::Ping.as_u16());
        assert_eq!(payload, vec![1, 2, 3]);
        assert!(dec.next_frame().unwrap().is_none());
    }

    #[test]
    fn roundtrip_arbitrary_chunk_splits() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode_frame(MessageId::Version, b"abc"));
        stream.extend_from_slice(&encode_frame(MessageId::UserState, &[]));
        stream.extend_from_slice(&encode_frame(MessageId::UdpTunnel, &[0xAA; 300]));

        // Every split position, including mid-header and mid-payload.
        for split in 0..=stream.len() {
            let mut dec = FrameDecoder::new();
            dec.extend(&stream[..split]);
            let mut frames = Vec::new();
            while let Some(f) = dec.next_frame().unwrap() {
                frames.push(f);
            }
            dec.extend(&stream[split..]);
            while let Some(f) = dec.next_frame().unwrap() {
                frames.push(f);
            }
            assert_eq!(frames.len(), 3, "split at {split}");
            assert_eq!(frames[0], (MessageId::Version.as_u16(), b"abc".to_vec()));
            assert_eq!(frames[1], (MessageId::UserState.as_u16(), Vec::new()));
            assert_eq!(frames[2].1.len(), 300);
        }
    }

    #[test]
    fn zero_length_payload_emits_after_header() {
        let mut dec = FrameDecoder::new();
        dec.extend(&encode_frame(MessageId::Ping, &[]));
        let (ty, payload) = dec.next_frame().unwrap().unwrap();
        assert_eq!(ty, MessageId::Ping.as_u16());
        assert!(payload.is_empty());
    }

    #[test]
    fn oversized_declared_length_is_fatal() {
        let mut dec = FrameDecoder::new();
        let mut bad = Vec::new();
        bad.extend_from_slice(&3u16.to_be_bytes());
        bad.extend_from_slice(&0x0080_0000u32.to_be_bytes());
        dec.extend(&bad);
        assert_eq!(
            dec.next_frame(),
            Err(ProtocolError::OversizedFrame { declared: 0x0080_0000 })
        );
    }

    #[test]
    fn unknown_type_codes_pass_through() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&999u16.to_be_bytes());
        raw.extend_from_slice(&2u32.to_be_bytes());
        raw.extend_from_slice(&[7, 8]);
        let mut dec = FrameDecoder::new();
        dec.extend(&raw);
        let (ty, payload) = dec.next_frame().unwrap().unwrap();
        assert_eq!(ty, 999);
        assert_eq!(payload, vec![7, 8]);
        assert!(MessageId::from_u16(ty).is_none());
    }
}
