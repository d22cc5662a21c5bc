//! HTTP session: reads requests off one connection and answers them until
//! the connection closes or is upgraded.
//!
//! ```text
//! Reading ──► Dispatching ──► Responding ──► Reading (keep-alive)
//!    │             │                └──────► Closed
//!    │             └──► Upgrading ─────────► channel session
//!    └──► Closed (end of stream, idle timeout, parse error, shutdown)
//! ```

use std::net::SocketAddr;

use chorus_core::{ParseError, ServerError};
use metrics::counter;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use super::request::{Parse, Request, parse_request};
use super::response::Response;
use crate::context::ConnectionContext;
use crate::websocket::channel::{self, ChannelExit};

/// Initial capacity of the per-connection read buffer.
const READ_BUFFER: usize = 4096;

/// How an HTTP session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpExit {
    /// A response asked for the connection to close.
    Closed,
    /// The peer closed between requests.
    PeerClosed,
    /// The peer closed partway through a request.
    Truncated,
    /// The server is shutting down.
    Shutdown,
    /// The connection became a channel session, which has since ended.
    Upgraded(ChannelExit),
}

/// Serve requests on `stream` until it closes or upgrades.
///
/// Parse failures get a `400` and close the connection. Every error is local
/// to this connection.
#[instrument(skip_all, fields(peer = %peer))]
pub async fn run_http_session<S>(
    mut stream: S,
    peer: SocketAddr,
    ctx: &ConnectionContext,
) -> Result<HttpExit, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut buf: Vec<u8> = Vec::with_capacity(READ_BUFFER);

    loop {
        let (request, consumed) = match read_request(&mut stream, &mut buf, ctx).await {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return finish_reading(&mut stream, &buf, ctx).await,
            Err(ServerError::Parse(e)) => {
                reject(&mut stream, &e, ctx).await;
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };
        let _ = buf.drain(..consumed);
        debug!(method = %request.method, uri = %request.target, "request");

        if request.is_upgrade() {
            counter!("http_upgrades_total").increment(1);
            let leftover = std::mem::take(&mut buf);
            return channel::accept(stream, leftover, &request, ctx)
                .await
                .map(HttpExit::Upgraded);
        }

        let response = ctx.responder.respond(&request).await;
        let keep_alive = response.keep_alive();
        counter!("http_requests_total", "status" => response.status().code().to_string())
            .increment(1);
        write_response(&mut stream, response, request.version, ctx).await?;

        if !keep_alive {
            let _ = stream.shutdown().await;
            return Ok(HttpExit::Closed);
        }
    }
}

/// Read until `buf` holds a complete request.
///
/// Returns `None` when the stream ended or shutdown began first.
async fn read_request<S>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    ctx: &ConnectionContext,
) -> Result<Option<(Request, usize)>, ServerError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Parse::Complete { request, consumed } =
            parse_request(buf.as_slice(), ctx.max_request_bytes)?
        {
            return Ok(Some((request, consumed)));
        }

        let read = tokio::select! {
            () = ctx.shutdown.cancelled() => return Ok(None),
            read = tokio::time::timeout(ctx.idle_timeout, stream.read_buf(buf)) => read,
        };
        match read {
            Err(_) => return Err(ServerError::Timeout(ctx.idle_timeout)),
            Ok(Err(e)) => return Err(ServerError::Transport(e)),
            Ok(Ok(0)) => return Ok(None),
            Ok(Ok(_)) => {}
        }
    }
}

/// Write one response, giving up if the peer stops reading for longer than
/// the idle timeout.
async fn write_response<S>(
    stream: &mut S,
    response: Response,
    version: u8,
    ctx: &ConnectionContext,
) -> Result<(), ServerError>
where
    S: AsyncWrite + Unpin,
{
    match tokio::time::timeout(ctx.idle_timeout, response.write_to(stream, version)).await {
        Ok(written) => written.map_err(ServerError::Transport),
        Err(_) => Err(ServerError::Timeout(ctx.idle_timeout)),
    }
}

/// Close after the read side stopped producing requests.
async fn finish_reading<S>(
    stream: &mut S,
    buf: &[u8],
    ctx: &ConnectionContext,
) -> Result<HttpExit, ServerError>
where
    S: AsyncWrite + Unpin,
{
    let _ = stream.shutdown().await;
    if ctx.shutdown.is_cancelled() {
        Ok(HttpExit::Shutdown)
    } else if buf.is_empty() {
        Ok(HttpExit::PeerClosed)
    } else {
        debug!(buffered = buf.len(), "peer closed mid-request");
        Ok(HttpExit::Truncated)
    }
}

/// Best-effort `400` for a request that could not be parsed.
async fn reject<S>(stream: &mut S, err: &ParseError, ctx: &ConnectionContext)
where
    S: AsyncWrite + Unpin,
{
    counter!("http_requests_total", "status" => "400").increment(1);
    let response = Response::bad_request(err.to_string(), false);
    if let Err(e) = write_response(stream, response, 1, ctx).await {
        debug!(error = %e, "failed to send 400");
    }
    let _ = stream.shutdown().await;
}
