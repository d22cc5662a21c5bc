//! WebSocket upgrade, channel sessions, and broadcast fan-out.
//!
//! | Module | Role |
//! |--------|------|
//! | [`handshake`] | validates the upgrade request and builds the `101` / `400` heads |
//! | [`connection`] | [`ChannelHandle`]: per-session outbound FIFO held by the registry |
//! | [`broadcast`] | [`BroadcastRegistry`]: live-session set and fan-out |
//! | [`channel`] | session lifecycle: read loop, writer task, heartbeat, teardown |

pub mod broadcast;
pub mod channel;
pub mod connection;
pub mod handshake;

pub use broadcast::{BroadcastRegistry, Registration};
pub use channel::ChannelExit;
pub use connection::ChannelHandle;
