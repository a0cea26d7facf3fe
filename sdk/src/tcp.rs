//! Reliable-stream outbound plumbing.
//!
//! Frames are queued to a writer task that performs one write per frame
//! (header and payload are already contiguous). The queue depth doubles
//! as the backpressure signal: when it grows past the threshold the
//! stream counts as saturated and latency-sensitive frames should be
//! dropped instead of queued indefinitely.

use async_channel::{unbounded, Receiver, Sender};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::ClientError;

/// Queued frames beyond which the stream reports saturation.
const SATURATION_DEPTH: usize = 32;

#[derive(Clone)]
pub struct StreamWriter {
    tx: Sender<Vec<u8>>,
}

impl StreamWriter {
    /// Spawn the writer task over the stream's write half.
    pub fn spawn<W>(mut write_half: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = unbounded();
        tokio::spawn(async move {
            while let Ok(frame) = rx.recv().await {
                if let Err(e) = write_half.write_all(&frame).await {
                    debug!("stream writer stopped: {}", e);
                    break;
                }
            }
        });
        Self { tx }
    }

    /// Whether the outbound queue is currently saturated.
    #[must_use]
    pub fn saturated(&self) -> bool {
        self.tx.len() >= SATURATION_DEPTH
    }

    /// Queue one complete frame. Never blocks; the queue is unbounded so
    /// must-send frames go out even while saturated.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), ClientError> {
        self.tx
            .try_send(frame)
            .map_err(|_| ClientError::Disconnected)
    }
}
