//! Error taxonomy for per-connection and process-level failures.
//!
//! - [`ParseError`]: the request head or body could not be accepted (→ 400)
//! - [`HandshakeError`]: a WebSocket upgrade request failed validation
//! - [`ServerError`]: everything a session or the listener can fail with
//!
//! Every variant except [`ServerError::Bind`] and [`ServerError::Accept`] is
//! local to exactly one connection: it ends that session and is logged, it
//! never reaches the listener.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Result type for chorus operations.
pub type Result<T> = std::result::Result<T, ServerError>;

// ─────────────────────────────────────────────────────────────────────────────
// ParseError
// ─────────────────────────────────────────────────────────────────────────────

/// A request could not be parsed or exceeded the configured size cap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The request line or a header was syntactically invalid.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The header section grew past the cap before it was complete.
    #[error("request head exceeds {limit} bytes")]
    HeadersTooLarge {
        /// Configured cap in bytes.
        limit: usize,
    },

    /// The declared body would push the request past the cap.
    #[error("request body of {length} bytes exceeds {limit} byte limit")]
    BodyTooLarge {
        /// Declared `Content-Length`.
        length: u64,
        /// Configured cap in bytes.
        limit: usize,
    },

    /// More headers than the parser accepts.
    #[error("too many headers")]
    TooManyHeaders,

    /// `Content-Length` was not a number or appeared with conflicting values.
    #[error("invalid Content-Length")]
    InvalidContentLength,

    /// A `Transfer-Encoding` body was sent; only `Content-Length` is supported.
    #[error("unsupported Transfer-Encoding")]
    UnsupportedTransferEncoding,
}

// ─────────────────────────────────────────────────────────────────────────────
// HandshakeError
// ─────────────────────────────────────────────────────────────────────────────

/// A WebSocket upgrade request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The request does not ask for a WebSocket upgrade at all.
    #[error("request is not a websocket upgrade")]
    NotUpgrade,

    /// `Sec-WebSocket-Version` is missing or not `13`.
    #[error("unsupported websocket version: {0:?}")]
    UnsupportedVersion(Option<String>),

    /// `Sec-WebSocket-Key` is missing or empty.
    #[error("missing Sec-WebSocket-Key")]
    MissingKey,
}

// ─────────────────────────────────────────────────────────────────────────────
// ServerError
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error for HTTP sessions, channel sessions, and the listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed or oversized request.
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// The requested resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// File system or other backend failure while producing a response.
    #[error("backend I/O error: {0}")]
    BackendIo(#[source] io::Error),

    /// Read or write failure on the socket, including peer reset.
    #[error("transport error: {0}")]
    Transport(#[source] io::Error),

    /// No bytes arrived within the idle window.
    #[error("connection idle for {0:?}")]
    Timeout(Duration),

    /// Upgrade negotiation failed; the session never joined the registry.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the bind was attempted on.
        addr: SocketAddr,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Accepting connections failed persistently.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

impl ServerError {
    /// HTTP status code a client should see for this error, if any.
    ///
    /// Transport-level failures have no status: the connection is simply
    /// closed.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Parse(_) => Some(400),
            Self::NotFound(_) => Some(404),
            Self::BackendIo(_) => Some(500),
            Self::Handshake(_) => Some(400),
            Self::Transport(_)
            | Self::Timeout(_)
            | Self::Bind { .. }
            | Self::Accept(_) => None,
        }
    }

    /// Whether the error is fatal to the whole process rather than one
    /// connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Accept(_))
    }

    /// Whether the error is an orderly peer disconnect that should not be
    /// reported as a failure.
    pub fn is_graceful_close(&self) -> bool {
        match self {
            Self::Transport(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
