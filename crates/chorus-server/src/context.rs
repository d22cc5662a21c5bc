//! State shared by every connection the listener accepts.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::http::static_files::Responder;
use crate::websocket::broadcast::BroadcastRegistry;

/// Everything a session needs besides its own stream.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Live channel sessions.
    pub registry: Arc<BroadcastRegistry>,
    /// Produces responses for non-upgrade requests.
    pub responder: Arc<dyn Responder>,
    /// Cap on request head plus declared body.
    pub max_request_bytes: usize,
    /// Time a read may wait for bytes.
    pub idle_timeout: Duration,
    /// Interval between server pings on channel sessions.
    pub heartbeat_interval: Duration,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

impl ConnectionContext {
    /// Build a context from configuration.
    pub fn new(
        config: &ServerConfig,
        registry: Arc<BroadcastRegistry>,
        responder: Arc<dyn Responder>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            responder,
            max_request_bytes: config.max_request_bytes,
            idle_timeout: config.idle_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            shutdown,
        }
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("live_sessions", &self.registry.len())
            .field("max_request_bytes", &self.max_request_bytes)
            .field("idle_timeout", &self.idle_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish_non_exhaustive()
    }
}
