//! Protocol version encodings.
//!
//! Two encodings travel in the `Version` message: the legacy 32-bit form
//! `(major << 16) | (minor << 8) | patch` and the modern 64-bit form
//! `(major << 48) | (minor << 32) | (patch << 16)`. The modern form is
//! preferred when present; the legacy form caps minor and patch at 255.

/// Negotiated version at or above which the peer speaks the tagged
/// audio/datagram formats instead of the legacy bit-packed ones.
/// Equals 1.5.0 in the modern encoding.
pub const MODERN_AUDIO_THRESHOLD: u64 = 281_496_451_547_136;

#[must_use]
pub fn encode_legacy(major: u16, minor: u8, patch: u8) -> u32 {
    (u32::from(major) << 16) | (u32::from(minor) << 8) | u32::from(patch)
}

#[must_use]
pub fn encode_modern(major: u16, minor: u16, patch: u16) -> u64 {
    (u64::from(major) << 48) | (u64::from(minor) << 32) | (u64::from(patch) << 16)
}

/// Lift a legacy-encoded version into the modern encoding.
#[must_use]
pub fn legacy_to_modern(legacy: u32) -> u64 {
    let major = (legacy >> 16) & 0xFFFF;
    let minor = (legacy >> 8) & 0xFF;
    let patch = legacy & 0xFF;
    (u64::from(major) << 48) | (u64::from(minor) << 32) | (u64::from(patch) << 16)
}

/// Whether a modern-encoded version selects the tagged wire formats.
#[must_use]
pub fn supports_modern_audio(modern: u64) -> bool {
    modern >= MODERN_AUDIO_THRESHOLD
}
