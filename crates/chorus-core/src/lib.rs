//! # chorus-core
//!
//! Foundation types shared by the chorus crates.
//!
//! - [`errors`]: per-connection error taxonomy and HTTP status mapping
//! - [`ids`]: opaque channel-session identifiers
//! - [`logging`]: global `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;

pub use errors::{HandshakeError, ParseError, ServerError};
pub use ids::SessionId;
