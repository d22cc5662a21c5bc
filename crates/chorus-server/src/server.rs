//! `ChorusServer`: binds the listening socket and owns the shared state.

use std::net::SocketAddr;
use std::sync::Arc;

use chorus_core::ServerError;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ServerConfig;
use crate::context::ConnectionContext;
use crate::http::static_files::{Responder, StaticFiles};
use crate::listener::run_listener;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::BroadcastRegistry;

/// The chorus server.
pub struct ChorusServer {
    config: ServerConfig,
    registry: Arc<BroadcastRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    responder: Arc<dyn Responder>,
}

impl ChorusServer {
    /// Create a server serving static files from `config.document_root`.
    pub fn new(config: ServerConfig) -> Self {
        let responder = Arc::new(StaticFiles::new(config.document_root.clone()));
        Self::with_responder(config, responder)
    }

    /// Create a server with a custom responder for non-upgrade requests.
    pub fn with_responder(config: ServerConfig, responder: Arc<dyn Responder>) -> Self {
        Self {
            registry: Arc::new(BroadcastRegistry::new(config.echo_to_sender)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            responder,
            config,
        }
    }

    /// Bind and start accepting.
    ///
    /// Returns the bound address (useful with port `0`) and the listener
    /// task, which completes after shutdown once sessions have drained.
    pub async fn listen(
        &self,
    ) -> Result<(SocketAddr, JoinHandle<Result<(), ServerError>>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let ctx = Arc::new(ConnectionContext::new(
            &self.config,
            Arc::clone(&self.registry),
            Arc::clone(&self.responder),
            self.shutdown.token(),
        ));
        info!(
            addr = %local,
            document_root = %self.config.document_root.display(),
            echo_to_sender = self.config.echo_to_sender,
            "listening"
        );
        let handle = tokio::spawn(run_listener(listener, ctx, self.config.shutdown_grace()));
        Ok((local, handle))
    }

    /// Get the broadcast registry.
    pub fn registry(&self) -> &Arc<BroadcastRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
