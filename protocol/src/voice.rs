//! Datagram voice payload formats.
//!
//! Two mutually exclusive formats exist, selected by the negotiated
//! protocol version: the legacy bit-packed format (3-bit type + 5-bit
//! target header byte, varint fields) and the modern tagged format
//! (1-byte discriminant + structured body). A connection speaks exactly
//! one of them in each direction, so [`VoicePacket::parse`] takes the
//! negotiated flag rather than sniffing overlapping discriminants.

use crate::error::ProtocolError;
use crate::io::{Reader, Writer};

/// Legacy payload kinds, packed into the header byte's top 3 bits.
pub const LEGACY_CELT_ALPHA: u8 = 0;
pub const LEGACY_PING: u8 = 1;
pub const LEGACY_SPEEX: u8 = 2;
pub const LEGACY_CELT_BETA: u8 = 3;
pub const LEGACY_OPUS: u8 = 4;

/// Modern 1-byte discriminants.
pub const MODERN_AUDIO: u8 = 0;
pub const MODERN_PING: u8 = 1;

/// Terminator flag inside the legacy opus length varint; the payload
/// length itself occupies the low 13 bits.
const LEGACY_TERMINATOR_BIT: u32 = 0x2000;
const LEGACY_LENGTH_MASK: u32 = 0x1FFF;

/// Legacy bit-packed voice packet.
///
/// Outbound packets (client to server) carry no session id; inbound ones
/// carry the sender's session right after the header byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyAudio {
    pub kind: u8,
    pub target: u8,
    /// Sender session; `None` on the outbound direction.
    pub session: Option<u32>,
    pub sequence: u32,
    pub payload: Vec<u8>,
    pub terminator: bool,
}

impl LegacyAudio {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.kind < 8 && self.target < 32);
        debug_assert!(self.payload.len() as u32 <= LEGACY_LENGTH_MASK);
        let mut w = Writer::with_capacity(self.payload.len() + 8);
        w.write_u8((self.kind << 5) | self.target);
        if let Some(session) = self.session {
            w.write_varint(session);
        }
        w.write_varint(self.sequence);
        let mut len_field = self.payload.len() as u32 & LEGACY_LENGTH_MASK;
        if self.terminator {
            len_field |= LEGACY_TERMINATOR_BIT;
        }
        w.write_varint(len_field);
        w.write_bytes(&self.payload);
        w.into_vec()
    }

    /// Decode a packet as received from the server (session id present).
    ///
    /// # Errors
    /// Returns an error on truncation or a length field that disagrees
    /// with the actual payload size.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(data);
        let header = r.read_u8()?;
        let kind = header >> 5;
        let target = header & 0x1F;
        if kind == LEGACY_PING {
            // Ping payload is just the varint timestamp; no session.
            let _timestamp = r.read_varint()?;
            return Ok(Self {
                kind,
                target,
                session: None,
                sequence: 0,
                payload: Vec::new(),
                terminator: false,
            });
        }
        let session = r.read_varint()?;
        let sequence = r.read_varint()?;
        let len_field = r.read_varint()?;
        let len = (len_field & LEGACY_LENGTH_MASK) as usize;
        let payload = r.remaining();
        if payload.len() < len {
            return Err(ProtocolError::TooShort {
                expected: len,
                got: payload.len(),
            });
        }
        Ok(Self {
            kind,
            target,
            session: Some(session),
            sequence,
            payload: payload[..len].to_vec(),
            terminator: len_field & LEGACY_TERMINATOR_BIT != 0,
        })
    }
}

/// Modern tagged audio message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioMessage {
    /// Sender session; set on the inbound direction.
    pub session: Option<u32>,
    /// Voice target; set on the outbound direction.
    pub target: Option<u32>,
    pub frame_number: u32,
    pub payload: Vec<u8>,
    pub terminator: bool,
}

const AUDIO_FLAG_TERMINATOR: u8 = 1;
const AUDIO_FLAG_SESSION: u8 = 1 << 1;
const AUDIO_FLAG_TARGET: u8 = 1 << 2;

impl AudioMessage {
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(self.payload.len() + 10);
        w.write_u8(MODERN_AUDIO);
        let mut flags = 0u8;
        if self.terminator {
            flags |= AUDIO_FLAG_TERMINATOR;
        }
        if self.session.is_some() {
            flags |= AUDIO_FLAG_SESSION;
        }
        if self.target.is_some() {
            flags |= AUDIO_FLAG_TARGET;
        }
        w.write_u8(flags);
        if let Some(session) = self.session {
            w.write_varint(session);
        }
        if let Some(target) = self.target {
            w.write_varint(target);
        }
        w.write_varint(self.frame_number);
        w.write_bytes(&self.payload);
        w.into_vec()
    }

    /// Decode the body following the `MODERN_AUDIO` discriminant.
    fn decode_body(r: &mut Reader<'_>) -> Result<Self, ProtocolError> {
        let flags = r.read_u8()?;
        let session = if flags & AUDIO_FLAG_SESSION != 0 {
            Some(r.read_varint()?)
        } else {
            None
        };
        let target = if flags & AUDIO_FLAG_TARGET != 0 {
            Some(r.read_varint()?)
        } else {
            None
        };
        let frame_number = r.read_varint()?;
        Ok(Self {
            session,
            target,
            frame_number,
            payload: r.remaining().to_vec(),
            terminator: flags & AUDIO_FLAG_TERMINATOR != 0,
        })
    }

    /// # Errors
    /// Returns an error if the discriminant is not audio or the body is
    /// truncated.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(data);
        let tag = r.read_u8()?;
        if tag != MODERN_AUDIO {
            return Err(ProtocolError::InvalidDiscriminant(tag));
        }
        Self::decode_body(&mut r)
    }
}

/// Unified inbound view of a decrypted (or tunneled) voice datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoicePacket {
    /// Ping sub-type in either format; recognized and discarded, never
    /// forwarded as voice.
    Ping,
    Audio {
        session: u32,
        sequence: u32,
        payload: Vec<u8>,
        terminator: bool,
    },
}

impl VoicePacket {
    /// Parse an inbound voice payload in whichever format the negotiated
    /// version selected.
    ///
    /// # Errors
    /// Returns an error on truncated or malformed packets; the caller
    /// drops those silently.
    pub fn parse(data: &[u8], modern: bool) -> Result<Self, ProtocolError> {
        if modern {
            let mut r = Reader::new(data);
            match r.read_u8()? {
                MODERN_PING => Ok(VoicePacket::Ping),
                MODERN_AUDIO => {
                    let msg = AudioMessage::decode_body(&mut r)?;
                    Ok(VoicePacket::Audio {
                        session: msg.session.ok_or(ProtocolError::Malformed(
                            "audio message without sender session",
                        ))?,
                        sequence: msg.frame_number,
                        payload: msg.payload,
                        terminator: msg.terminator,
                    })
                }
                tag => Err(ProtocolError::InvalidDiscriminant(tag)),
            }
        } else {
            let packet = LegacyAudio::decode(data)?;
            if packet.kind == LEGACY_PING {
                return Ok(VoicePacket::Ping);
            }
            Ok(VoicePacket::Audio {
                session: packet.session.ok_or(ProtocolError::Malformed(
                    "legacy voice packet without sender session",
                ))?,
                sequence: packet.sequence,
                payload: packet.payload,
                terminator: packet.terminator,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_opus_packet_roundtrip() {
        // Header byte 0x80: type 4 (opus), target 0.
        let packet = LegacyAudio {
            kind: LEGACY_OPUS,
            target: 0,
            session: Some(5),
            sequence: 10,
            payload: (0u8..20).collect(),
            terminator: false,
        };
        let bytes = packet.encode();
        assert_eq!(bytes[0], 0x80);
        let decoded = LegacyAudio::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);

        match VoicePacket::parse(&bytes, false).unwrap() {
            VoicePacket::Audio {
                session,
                payload,
                terminator,
                ..
            } => {
                assert_eq!(session, 5);
                assert_eq!(payload, (0u8..20).collect::<Vec<_>>());
                assert!(!terminator);
            }
            VoicePacket::Ping => panic!("parsed as ping"),
        }
    }

    #[test]
    fn legacy_terminator_bit() {
        let packet = LegacyAudio {
            kind: LEGACY_OPUS,
            target: 3,
            session: Some(77),
            sequence: 1000,
            payload: vec![0xAB; 4],
            terminator: true,
        };
        let decoded = LegacyAudio::decode(&packet.encode()).unwrap();
        assert!(decoded.terminator);
        assert_eq!(decoded.payload.len(), 4);
    }

    #[test]
    fn legacy_ping_is_discarded() {
        let mut w = Writer::new();
        w.write_u8(LEGACY_PING << 5);
        w.write_varint(123_456);
        assert_eq!(
            VoicePacket::parse(&w.into_vec(), false).unwrap(),
            VoicePacket::Ping
        );
    }

    #[test]
    fn modern_audio_roundtrip() {
        let msg = AudioMessage {
            session: Some(9),
            target: None,
            frame_number: 42,
            payload: vec![1, 2, 3, 4],
            terminator: true,
        };
        let decoded = AudioMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);

        match VoicePacket::parse(&msg.encode(), true).unwrap() {
            VoicePacket::Audio {
                session,
                sequence,
                terminator,
                ..
            } => {
                assert_eq!(session, 9);
                assert_eq!(sequence, 42);
                assert!(terminator);
            }
            VoicePacket::Ping => panic!("parsed as ping"),
        }
    }

    #[test]
    fn modern_ping_is_discarded() {
        assert_eq!(
            VoicePacket::parse(&[MODERN_PING], true).unwrap(),
            VoicePacket::Ping
        );
    }

    #[test]
    fn modern_outbound_form_has_target_not_session() {
        let msg = AudioMessage {
            session: None,
            target: Some(1),
            frame_number: 7,
            payload: vec![0x55; 8],
            terminator: false,
        };
        let decoded = AudioMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded.target, Some(1));
        assert_eq!(decoded.session, None);
    }
}
