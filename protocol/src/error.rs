use std::fmt;

/// Protocol decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    TooShort { expected: usize, got: usize },
    InvalidUtf8,
    /// A frame header declared a payload longer than the protocol allows.
    OversizedFrame { declared: usize },
    /// A varint value does not fit the 32-bit top class.
    VarintOverflow,
    /// A message body carried a discriminant outside its enumeration.
    InvalidDiscriminant(u8),
    /// A message body that could not be decoded as declared.
    Malformed(&'static str),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::TooShort { expected, got } => {
                write!(f, "buffer too short: expected at least {} bytes, got {}", expected, got)
            }
            ProtocolError::InvalidUtf8 => {
                write!(f, "invalid UTF-8 encoding")
            }
            ProtocolError::OversizedFrame { declared } => {
                write!(f, "frame payload of {} bytes exceeds protocol limit", declared)
            }
            ProtocolError::VarintOverflow => {
                write!(f, "varint value exceeds 32 bits")
            }
            ProtocolError::InvalidDiscriminant(d) => {
                write!(f, "invalid discriminant: 0x{:02x}", d)
            }
            ProtocolError::Malformed(what) => {
                write!(f, "malformed message: {}", what)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}
