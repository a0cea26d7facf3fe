//! Async client SDK for the Airband voice protocol.
//!
//! [`Client`] owns the connection: it drives the control stream and the
//! encrypted datagram path from a single task, keeps a mirror of the
//! server's user and channel state, and surfaces everything that happens
//! as [`ClientEvent`]s. The protocol logic itself lives in [`Session`],
//! which is synchronous and does no I/O so the whole state machine is
//! testable without sockets.

pub mod audio;
pub mod client;
pub mod crypto;
pub mod error;
pub mod events;
pub mod model;
pub mod session;
pub mod tcp;

pub use client::Client;
pub use crypto::{CryptState, CryptStats};
pub use error::ClientError;
pub use events::ClientEvent;
pub use model::{Channel, Roster, User};
pub use session::{Session, SessionConfig, SessionState};
