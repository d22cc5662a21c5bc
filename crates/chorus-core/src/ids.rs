//! Opaque identifiers for upgraded channel sessions.
//!
//! A [`SessionId`] is the registry key for one live WebSocket session. It is
//! generated once on upgrade and never reused, so the broadcast registry can
//! track membership by value instead of by object identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one upgraded channel session (`ws_<uuid v7>`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new, time-ordered session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(format!("ws_{}", Uuid::now_v7()))
    }

    /// Create from an existing string value.
    #[must_use]
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
