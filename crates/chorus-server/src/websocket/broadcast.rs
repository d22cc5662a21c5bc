//! Broadcast registry: the shared set of live channel sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chorus_core::SessionId;
use metrics::counter;
use parking_lot::RwLock;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tracing::{debug, info, warn};

use super::connection::ChannelHandle;

/// Shared set of live channel sessions with fan-out delivery.
///
/// `send` enqueues under the read lock, so the recipients of one message are
/// exactly the sessions live when it started; `join` and `leave` wait for
/// any in-progress fan-out to finish.
pub struct BroadcastRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<ChannelHandle>>>,
    /// Live session count (avoids read-locking for count queries).
    live: AtomicUsize,
    echo_to_sender: bool,
}

impl BroadcastRegistry {
    /// Create an empty registry.
    ///
    /// With `echo_to_sender` set, a message is delivered to every live
    /// session including the one that sent it.
    pub fn new(echo_to_sender: bool) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            live: AtomicUsize::new(0),
            echo_to_sender,
        }
    }

    /// Add a session. Returns `false` and leaves the set unchanged if the ID
    /// is already present.
    pub fn join(&self, handle: Arc<ChannelHandle>) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&handle.id) {
            warn!(session_id = %handle.id, "session already joined");
            return false;
        }
        let id = handle.id.clone();
        let _ = sessions.insert(id.clone(), handle);
        let live = self.live.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(session_id = %id, live, "session joined");
        true
    }

    /// Remove a session. Returns `false` if it was not present.
    pub fn leave(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.remove(id).is_some() {
            let live = self.live.fetch_sub(1, Ordering::Relaxed) - 1;
            debug!(session_id = %id, live, "session left");
            true
        } else {
            false
        }
    }

    /// Join and return a guard that leaves when dropped.
    ///
    /// If the ID is already present the guard owns nothing, so dropping it
    /// cannot evict the session that joined first.
    pub fn register(self: &Arc<Self>, handle: Arc<ChannelHandle>) -> Registration {
        let id = handle.id.clone();
        let joined = self.join(handle);
        Registration {
            registry: Arc::clone(self),
            id: joined.then_some(id),
        }
    }

    /// Enqueue `message` on every live session.
    ///
    /// Never waits on a recipient's write. Returns the number of sessions the
    /// message was enqueued on.
    pub fn send(&self, from: &SessionId, message: Utf8Bytes) -> usize {
        let mut recipients = 0usize;
        {
            let sessions = self.sessions.read();
            for (id, handle) in sessions.iter() {
                if !self.echo_to_sender && id == from {
                    continue;
                }
                if handle.send(message.clone()) {
                    recipients += 1;
                } else {
                    counter!("ws_broadcast_drops_total").increment(1);
                    debug!(session_id = %id, "recipient writer already stopped");
                }
            }
        }
        counter!("ws_broadcasts_total").increment(1);
        info!(
            timestamp = %chrono::Utc::now().to_rfc3339(),
            from = %from,
            recipients,
            payload = message.as_str(),
            "broadcast"
        );
        recipients
    }

    /// Whether a session is currently live.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether senders receive their own messages.
    pub fn echoes_to_sender(&self) -> bool {
        self.echo_to_sender
    }
}

impl Default for BroadcastRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Registry membership of one session; leaves exactly once.
///
/// Dropping the guard (including when the owning task is aborted) removes the
/// session, so a forced close cannot leave a stale entry behind.
pub struct Registration {
    registry: Arc<BroadcastRegistry>,
    id: Option<SessionId>,
}

impl Registration {
    /// Session this guard belongs to.
    pub fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    /// Leave now. Later calls and the eventual drop are no-ops.
    pub fn leave(&mut self) {
        if let Some(id) = self.id.take() {
            let _ = self.registry.leave(&id);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.leave();
    }
}
