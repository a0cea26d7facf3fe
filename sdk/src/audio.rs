//! Audio packetization and speaking-state tracking.
//!
//! Outbound frames are built in whichever wire format the negotiated
//! version selected and routed through the datagram transport when it is
//! established, otherwise tunneled through the reliable stream under the
//! `UdpTunnel` frame type. The shared sequence counter advances only
//! after all drop checks pass, so intentionally dropped frames leave no
//! visible gaps.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::trace;

use airband_protocol::{
    encode_frame,
    voice::{AudioMessage, LegacyAudio, LEGACY_OPUS},
    MessageId,
};

/// Gap after the last audio packet before a session counts as having
/// stopped speaking.
pub const SPEAKING_TIMEOUT: Duration = Duration::from_millis(400);

/// Where one outbound frame ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioRoute {
    /// Raw voice payload for the datagram transport (pre-encryption).
    Datagram(Vec<u8>),
    /// Complete `UdpTunnel` frame for the reliable stream.
    Tunnel(Vec<u8>),
    /// Dropped by backpressure; nothing was sent and the sequence
    /// counter did not move.
    Dropped,
}

/// Builds outbound voice packets.
pub struct Packetizer {
    sequence: u32,
    modern: bool,
}

impl Packetizer {
    #[must_use]
    pub fn new(modern: bool) -> Self {
        Self {
            sequence: 0,
            modern,
        }
    }

    /// Reset for a fresh connection; the sequence counter restarts only
    /// here.
    pub fn reset(&mut self, modern: bool) {
        self.sequence = 0;
        self.modern = modern;
    }

    #[must_use]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Build and route one opaque audio payload.
    ///
    /// When the datagram path is not established the frame tunnels over
    /// the reliable stream; if that stream is saturated, non-terminal
    /// frames are dropped silently but terminal frames always go out so
    /// receivers see a clean end-of-transmission marker.
    pub fn build(
        &mut self,
        payload: &[u8],
        target: u32,
        terminator: bool,
        datagram_established: bool,
        stream_saturated: bool,
    ) -> AudioRoute {
        if !datagram_established && stream_saturated && !terminator {
            trace!("dropping non-terminal audio frame under backpressure");
            return AudioRoute::Dropped;
        }

        let bytes = if self.modern {
            AudioMessage {
                session: None,
                target: Some(target),
                frame_number: self.sequence,
                payload: payload.to_vec(),
                terminator,
            }
            .encode()
        } else {
            LegacyAudio {
                kind: LEGACY_OPUS,
                target: target as u8,
                session: None,
                sequence: self.sequence,
                payload: payload.to_vec(),
                terminator,
            }
            .encode()
        };
        self.sequence = self.sequence.wrapping_add(1);

        if datagram_established {
            AudioRoute::Datagram(bytes)
        } else {
            AudioRoute::Tunnel(encode_frame(MessageId::UdpTunnel, &bytes))
        }
    }
}

/// Edge-triggered speaking detection per session.
///
/// One map of session to expiry instant, scanned on the driver's tick;
/// no per-session timers.
pub struct SpeakingTracker {
    deadlines: HashMap<u32, Instant>,
    timeout: Duration,
}

impl SpeakingTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(SPEAKING_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadlines: HashMap::new(),
            timeout,
        }
    }

    /// Record an audio packet from `session`.
    ///
    /// Returns `true` exactly on the edge from not-speaking to speaking.
    pub fn touch(&mut self, session: u32, now: Instant) -> bool {
        self.deadlines.insert(session, now + self.timeout).is_none()
    }

    /// Collect sessions whose timers fired unrefreshed.
    pub fn expire(&mut self, now: Instant) -> Vec<u32> {
        let expired: Vec<u32> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(session, _)| *session)
            .collect();
        for session in &expired {
            self.deadlines.remove(session);
        }
        expired
    }

    #[must_use]
    pub fn is_speaking(&self, session: u32) -> bool {
        self.deadlines.contains_key(&session)
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

impl Default for SpeakingTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airband_protocol::voice::VoicePacket;

    #[test]
    fn modern_frame_routes_to_datagram_when_established() {
        let mut p = Packetizer::new(true);
        let route = p.build(&[1, 2, 3], 0, false, true, false);
        let AudioRoute::Datagram(bytes) = route else {
            panic!("expected datagram route");
        };
        let msg = AudioMessage::decode(&bytes).unwrap();
        assert_eq!(msg.target, Some(0));
        assert_eq!(msg.frame_number, 0);
        assert_eq!(p.sequence(), 1);
    }

    #[test]
    fn legacy_frame_tunnels_when_datagram_down() {
        let mut p = Packetizer::new(false);
        let route = p.build(&[9; 20], 1, false, false, false);
        let AudioRoute::Tunnel(frame) = route else {
            panic!("expected tunnel route");
        };
        assert_eq!(
            u16::from_be_bytes([frame[0], frame[1]]),
            MessageId::UdpTunnel.as_u16()
        );
        // The tunneled bytes are the identical voice packet.
        let packet = LegacyAudio {
            kind: LEGACY_OPUS,
            target: 1,
            session: None,
            sequence: 0,
            payload: vec![9; 20],
            terminator: false,
        };
        assert_eq!(&frame[6..], packet.encode().as_slice());
    }

    #[test]
    fn saturation_drops_non_terminal_without_sequence_gap() {
        let mut p = Packetizer::new(true);
        assert!(matches!(
            p.build(&[1], 0, false, false, false),
            AudioRoute::Tunnel(_)
        ));
        assert_eq!(p.sequence(), 1);

        // Saturated: silent drop, counter untouched.
        assert_eq!(p.build(&[2], 0, false, false, true), AudioRoute::Dropped);
        assert_eq!(p.sequence(), 1);

        // The next sent frame carries the very next number.
        let AudioRoute::Tunnel(frame) = p.build(&[3], 0, false, false, false) else {
            panic!("expected tunnel route");
        };
        let msg = AudioMessage::decode(&frame[6..]).unwrap();
        assert_eq!(msg.frame_number, 1);
    }

    #[test]
    fn terminal_frame_sent_even_while_saturated() {
        let mut p = Packetizer::new(true);
        let route = p.build(&[], 0, true, false, true);
        let AudioRoute::Tunnel(frame) = route else {
            panic!("terminal frame must not be dropped");
        };
        let msg = AudioMessage::decode(&frame[6..]).unwrap();
        assert!(msg.terminator);
    }

    #[test]
    fn saturation_irrelevant_when_datagram_established() {
        let mut p = Packetizer::new(true);
        assert!(matches!(
            p.build(&[1], 0, false, true, true),
            AudioRoute::Datagram(_)
        ));
    }

    #[test]
    fn modern_datagram_parses_back_as_outbound_form() {
        let mut p = Packetizer::new(true);
        let AudioRoute::Datagram(bytes) = p.build(&[5; 10], 2, false, true, false) else {
            panic!("expected datagram route");
        };
        // Outbound packets carry a target, not a session; the server fills
        // the sender in before fan-out.
        let msg = AudioMessage::decode(&bytes).unwrap();
        assert_eq!(msg.session, None);
        assert_eq!(msg.target, Some(2));
        assert!(VoicePacket::parse(&bytes, true).is_err());
    }

    #[test]
    fn speaking_edges_fire_once_per_burst() {
        let mut tracker = SpeakingTracker::new();
        let t0 = Instant::now();

        // A burst of packets inside the timeout: one started edge.
        assert!(tracker.touch(5, t0));
        assert!(!tracker.touch(5, t0 + Duration::from_millis(20)));
        assert!(!tracker.touch(5, t0 + Duration::from_millis(40)));
        assert!(tracker.is_speaking(5));

        // No expiry while refreshed.
        assert!(tracker.expire(t0 + Duration::from_millis(100)).is_empty());

        // Gap exceeding the timeout: exactly one stopped edge.
        let stopped = tracker.expire(t0 + Duration::from_millis(40) + SPEAKING_TIMEOUT);
        assert_eq!(stopped, vec![5]);
        assert!(!tracker.is_speaking(5));
        assert!(tracker
            .expire(t0 + Duration::from_millis(50) + SPEAKING_TIMEOUT)
            .is_empty());

        // A later burst starts a fresh edge.
        assert!(tracker.touch(5, t0 + Duration::from_secs(2)));
    }

    #[test]
    fn tracker_handles_sessions_independently() {
        let mut tracker = SpeakingTracker::new();
        let t0 = Instant::now();
        assert!(tracker.touch(1, t0));
        assert!(tracker.touch(2, t0 + Duration::from_millis(300)));
        let stopped = tracker.expire(t0 + SPEAKING_TIMEOUT);
        assert_eq!(stopped, vec![1]);
        assert!(tracker.is_speaking(2));
    }
}
