//! Sending side of one channel session.
//!
//! A [`ChannelHandle`] is what the broadcast registry holds for each live
//! session. Enqueueing pushes onto an unbounded FIFO drained by the session's
//! single writer, so it never blocks the caller and never races another
//! enqueue on whether a write is already in flight.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chorus_core::SessionId;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Receiving end of a session's outbound queue, owned by its writer.
pub type OutboundReceiver = mpsc::UnboundedReceiver<Utf8Bytes>;

/// Registry-facing handle to one upgraded connection.
#[derive(Debug)]
pub struct ChannelHandle {
    /// Session identifier and registry key.
    pub id: SessionId,
    tx: mpsc::UnboundedSender<Utf8Bytes>,
    /// Messages enqueued but not yet written.
    pending: AtomicUsize,
    /// Messages dropped because the writer had already stopped.
    dropped: AtomicU64,
    connected_at: Instant,
}

impl ChannelHandle {
    /// Create a handle and the receiver its writer drains.
    pub fn new(id: SessionId) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            tx,
            pending: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            connected_at: Instant::now(),
        };
        (handle, rx)
    }

    /// Enqueue a message for this session.
    ///
    /// Returns `false` if the writer has already stopped; the message is
    /// dropped in that case.
    pub fn send(&self, message: Utf8Bytes) -> bool {
        let _ = self.pending.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(message).is_ok() {
            true
        } else {
            let _ = self.pending.fetch_sub(1, Ordering::Relaxed);
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Record that the writer finished writing one queued message.
    pub fn mark_written(&self) {
        let _ = self.pending.fetch_sub(1, Ordering::Relaxed);
    }

    /// Messages waiting to be written.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Messages dropped because the writer was gone.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the writer has stopped draining the queue.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Time since the upgrade completed.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
