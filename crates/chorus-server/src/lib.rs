//! # chorus-server
//!
//! TCP server that serves static files over HTTP/1.x and turns upgraded
//! connections into WebSocket chat channels.
//!
//! - HTTP sessions: request classification, static file responses, keep-alive
//! - WebSocket upgrade on the same port, with leftover bytes replayed
//! - Broadcast registry: every text message fans out to all live channels
//! - Idle timeouts, server pings, and graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod http;
pub mod listener;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use context::ConnectionContext;
pub use server::ChorusServer;
pub use shutdown::ShutdownCoordinator;
pub use websocket::BroadcastRegistry;
