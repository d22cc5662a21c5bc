//! Accept loop: one HTTP session task per TCP connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chorus_core::ServerError;
use metrics::{counter, gauge};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::ConnectionContext;
use crate::http::session::run_http_session;
use crate::shutdown;

/// Consecutive non-transient accept failures before the listener gives up.
pub const MAX_CONSECUTIVE_ACCEPT_ERRORS: u32 = 32;

/// Base delay before retrying after an accept failure.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Accept connections until shutdown, then drain in-flight sessions.
///
/// Sessions still running `grace` after shutdown began are aborted; their
/// registry membership is released by the registration guard.
pub async fn run_listener(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
    grace: Duration,
) -> Result<(), ServerError> {
    let mut sessions: JoinSet<()> = JoinSet::new();
    let mut failures = AcceptFailures::default();

    let result = loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => break Ok(()),
            Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!(error = %e, "session task panicked");
                    }
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    failures.reset();
                    spawn_session(&mut sessions, stream, peer, &ctx);
                }
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "transient accept error");
                }
                Err(e) => {
                    counter!("accept_errors_total").increment(1);
                    let Some(delay) = failures.record() else {
                        break Err(ServerError::Accept(e));
                    };
                    warn!(error = %e, consecutive = failures.consecutive, "accept failed, backing off");
                    if !back_off(&ctx.shutdown, delay).await {
                        break Ok(());
                    }
                }
            },
        }
    };

    drop(listener);
    ctx.shutdown.cancel();
    let aborted = shutdown::drain(&mut sessions, grace).await;
    info!(aborted, "listener stopped");
    result
}

/// Run of non-transient accept failures since the last success.
#[derive(Debug, Default)]
struct AcceptFailures {
    consecutive: u32,
}

impl AcceptFailures {
    fn reset(&mut self) {
        self.consecutive = 0;
    }

    /// Count one failure. Returns the delay before retrying, or `None` once
    /// the limit is reached.
    fn record(&mut self) -> Option<Duration> {
        self.consecutive += 1;
        if self.consecutive >= MAX_CONSECUTIVE_ACCEPT_ERRORS {
            None
        } else {
            Some(ACCEPT_BACKOFF * self.consecutive.min(10))
        }
    }
}

/// Sleep for `delay`. Returns `false` if shutdown began first.
async fn back_off(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        () = shutdown.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

fn spawn_session(
    sessions: &mut JoinSet<()>,
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &Arc<ConnectionContext>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "failed to set TCP_NODELAY");
    }
    counter!("http_connections_total").increment(1);
    gauge!("http_connections_active").increment(1.0);

    let ctx = Arc::clone(ctx);
    let _ = sessions.spawn(async move {
        match run_http_session(stream, peer, &ctx).await {
            Ok(exit) => debug!(%peer, ?exit, "connection closed"),
            Err(e) if e.is_graceful_close() => debug!(%peer, error = %e, "connection dropped"),
            Err(e @ ServerError::Timeout(_)) => info!(%peer, error = %e, "connection timed out"),
            Err(e) => warn!(%peer, error = %e, "connection failed"),
        }
        gauge!("http_connections_active").decrement(1.0);
    });
}

/// Accept errors that concern one would-be connection, not the socket.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
