//! Server configuration and environment overrides.
//!
//! Loading flow:
//! 1. Start with [`ServerConfig::default()`] or the values given on the command line
//! 2. Apply `CHORUS_*` environment overrides (highest priority)
//!
//! Invalid environment values are ignored with a warning.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use chorus_core::logging::LogFormat;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Configuration for the chorus server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (default `127.0.0.1`).
    pub host: IpAddr,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Directory static files are served from.
    pub document_root: PathBuf,
    /// Cap on request head plus declared body, in bytes.
    pub max_request_bytes: usize,
    /// Idle time after which a read gives up, in seconds.
    pub idle_timeout_secs: u64,
    /// Interval between server-initiated WebSocket pings, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Time in-flight sessions get to finish after shutdown, in seconds.
    pub shutdown_grace_secs: u64,
    /// Whether a broadcast is also delivered back to its sender.
    pub echo_to_sender: bool,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit logs as JSON instead of compact text.
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            document_root: PathBuf::from("."),
            max_request_bytes: 10_000,
            idle_timeout_secs: 30,
            heartbeat_interval_secs: 15,
            shutdown_grace_secs: 5,
            echo_to_sender: true,
            log_level: "info".into(),
            log_json: false,
        }
    }
}

impl ServerConfig {
    /// Socket address to bind.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Idle read timeout.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// WebSocket ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Grace period for draining sessions on shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Log output format.
    pub fn log_format(&self) -> LogFormat {
        if self.log_json {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }

    /// Apply `CHORUS_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_usize("CHORUS_MAX_REQUEST_BYTES", 512, 64 * 1024 * 1024) {
            self.max_request_bytes = v;
        }
        if let Some(v) = read_env_u64("CHORUS_IDLE_TIMEOUT_SECS", 1, 86_400) {
            self.idle_timeout_secs = v;
        }
        if let Some(v) = read_env_u64("CHORUS_HEARTBEAT_INTERVAL_SECS", 1, 86_400) {
            self.heartbeat_interval_secs = v;
        }
        if let Some(v) = read_env_u64("CHORUS_SHUTDOWN_GRACE_SECS", 0, 3_600) {
            self.shutdown_grace_secs = v;
        }
        if let Some(v) = read_env_bool("CHORUS_ECHO_TO_SENDER") {
            self.echo_to_sender = v;
        }
        if let Some(v) = read_env_string("CHORUS_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = read_env_bool("CHORUS_LOG_JSON") {
            self.log_json = v;
        }
    }

    /// Warn about combinations that make sessions misbehave.
    pub fn check(&self) {
        if self.heartbeat_interval_secs >= self.idle_timeout_secs {
            warn!(
                heartbeat_interval_secs = self.heartbeat_interval_secs,
                idle_timeout_secs = self.idle_timeout_secs,
                "heartbeat interval is not shorter than the idle timeout; idle websocket peers will be dropped"
            );
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, min, max, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, min, max, "invalid usize env var, ignoring");
    }
    result
}
