//! Channel session lifecycle: one upgraded client from handshake through
//! disconnect.
//!
//! The session task runs the read loop; a spawned writer task owns the sink
//! and drains the session's outbound queue. Either side ending stops the
//! other through a shared cancellation token.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chorus_core::{ServerError, SessionId};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ChannelHandle, OutboundReceiver};
use super::handshake;
use crate::context::ConnectionContext;
use crate::http::request::Request;

/// How long the writer waits for the close handshake to flush.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Lower bound on the ping period.
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Why a channel session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelExit {
    /// The peer sent a Close frame.
    PeerClosed,
    /// The stream ended without a Close frame.
    StreamEnded,
    /// The server is shutting down.
    Shutdown,
    /// The writer failed, so the session was stopped from the write side.
    WriterStopped,
}

/// Complete the upgrade for `request` and run the session to completion.
///
/// `leftover` holds bytes the HTTP session buffered past the upgrade request;
/// they are fed to the WebSocket stream before any new socket reads. On a
/// handshake failure a `400` is written and the session never joins the
/// registry.
pub async fn accept<S>(
    mut stream: S,
    leftover: Vec<u8>,
    request: &Request,
    ctx: &ConnectionContext,
) -> Result<ChannelExit, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let accept = match handshake::accept_key(request) {
        Ok(accept) => accept,
        Err(e) => {
            warn!(error = %e, uri = %request.target, "websocket handshake rejected");
            counter!("ws_handshake_failures_total").increment(1);
            stream
                .write_all(handshake::rejection(&e).as_bytes())
                .await
                .map_err(ServerError::Transport)?;
            let _ = stream.shutdown().await;
            return Err(e.into());
        }
    };

    stream
        .write_all(handshake::switching_protocols(&accept).as_bytes())
        .await
        .map_err(ServerError::Transport)?;
    stream.flush().await.map_err(ServerError::Transport)?;

    let ws = WebSocketStream::from_partially_read(stream, leftover, Role::Server, None).await;
    run_channel(ws, SessionId::new(), ctx).await
}

/// Run an already-upgraded WebSocket as a channel session.
///
/// Joins the registry, relays every inbound text message to it, and writes
/// queued broadcasts back out until the peer leaves, a read times out, or the
/// server shuts down. The session has left the registry when this returns.
#[instrument(skip_all, fields(session_id = %id))]
pub async fn run_channel<S>(
    ws: WebSocketStream<S>,
    id: SessionId,
    ctx: &ConnectionContext,
) -> Result<ChannelExit, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, mut stream) = ws.split();
    let (handle, rx) = ChannelHandle::new(id.clone());
    let handle = Arc::new(handle);

    let mut registration = ctx.registry.register(Arc::clone(&handle));
    info!(live = ctx.registry.len(), "channel connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    let stop = ctx.shutdown.child_token();
    // stops the writer if this task is aborted
    let _stop_on_drop = stop.clone().drop_guard();

    let mut writer = tokio::spawn(write_loop(
        sink,
        rx,
        Arc::clone(&handle),
        ctx.heartbeat_interval,
        stop.clone(),
    ));

    let result = read_loop(&mut stream, &id, ctx, &stop).await;

    registration.leave();
    stop.cancel();
    if tokio::time::timeout(CLOSE_TIMEOUT * 2, &mut writer)
        .await
        .is_err()
    {
        debug!("writer did not finish, aborting");
        writer.abort();
    }

    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(handle.age().as_secs_f64());
    match &result {
        Ok(exit) => info!(?exit, unsent = handle.pending(), "channel disconnected"),
        Err(e) if e.is_graceful_close() => debug!(error = %e, "channel dropped by peer"),
        Err(e) => warn!(error = %e, "channel failed"),
    }
    result
}

async fn read_loop<S>(
    stream: &mut SplitStream<WebSocketStream<S>>,
    id: &SessionId,
    ctx: &ConnectionContext,
    stop: &CancellationToken,
) -> Result<ChannelExit, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let next = tokio::select! {
            () = stop.cancelled() => {
                return Ok(if ctx.shutdown.is_cancelled() {
                    ChannelExit::Shutdown
                } else {
                    ChannelExit::WriterStopped
                });
            }
            next = tokio::time::timeout(ctx.idle_timeout, stream.next()) => next,
        };

        let message = match next {
            Err(_) => return Err(ServerError::Timeout(ctx.idle_timeout)),
            Ok(None) => return Ok(ChannelExit::StreamEnded),
            Ok(Some(Err(e))) => return Err(transport_error(e)),
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                counter!("ws_messages_received_total").increment(1);
                let _ = ctx.registry.send(id, text);
            }
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    counter!("ws_messages_received_total").increment(1);
                    let _ = ctx.registry.send(id, Utf8Bytes::from(text.to_string()));
                }
                Err(_) => debug!(len = data.len(), "dropping non-UTF-8 binary frame"),
            },
            Message::Close(frame) => {
                debug!(?frame, "peer sent close frame");
                return Ok(ChannelExit::PeerClosed);
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
}

async fn write_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut rx: OutboundReceiver,
    handle: Arc<ChannelHandle>,
    heartbeat: Duration,
    stop: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ping = tokio::time::interval(heartbeat.max(MIN_HEARTBEAT));
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            msg = rx.recv() => {
                let Some(text) = msg else { break };
                let result = sink.send(Message::Text(text)).await;
                handle.mark_written();
                if let Err(e) = result {
                    debug!(error = %e, "write failed");
                    break;
                }
                counter!("ws_messages_sent_total").increment(1);
            }
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(vec![].into())).await {
                    debug!(error = %e, "ping failed");
                    break;
                }
            }
        }
    }

    stop.cancel();
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "close failed"),
        Err(_) => debug!("close timed out"),
    }
}

/// Map a tungstenite error onto the transport variant, keeping peer
/// disconnects recognisable as graceful.
pub(crate) fn transport_error(e: tungstenite::Error) -> ServerError {
    match e {
        tungstenite::Error::Io(e) => ServerError::Transport(e),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            ServerError::Transport(io::ErrorKind::ConnectionAborted.into())
        }
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            ServerError::Transport(io::ErrorKind::ConnectionReset.into())
        }
        other => ServerError::Transport(io::Error::other(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::static_files::StaticFiles;
    use crate::websocket::broadcast::BroadcastRegistry;
    use assert_matches::assert_matches;
    use chorus_core::HandshakeError;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn context(echo_to_sender: bool) -> ConnectionContext {
        ConnectionContext {
            registry: Arc::new(BroadcastRegistry::new(echo_to_sender)),
            responder: Arc::new(StaticFiles::new(".")),
            max_request_bytes: 10_000,
            idle_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(15),
            shutdown: CancellationToken::new(),
        }
    }

    fn upgrade_request(key: Option<&str>) -> Request {
        let mut headers: Vec<(String, String)> = vec![
            ("Host".into(), "localhost".into()),
            ("Connection".into(), "Upgrade".into()),
            ("Upgrade".into(), "websocket".into()),
            ("Sec-WebSocket-Version".into(), "13".into()),
        ];
        if let Some(key) = key {
            headers.push(("Sec-WebSocket-Key".into(), key.into()));
        }
        Request {
            method: "GET".into(),
            target: "/".into(),
            version: 1,
            headers,
            body: Vec::new(),
        }
    }

    const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    async fn read_head(io: &mut DuplexStream) -> String {
        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            head.push(io.read_u8().await.unwrap());
        }
        String::from_utf8(head).unwrap()
    }

    fn spawn_accept(
        server_io: DuplexStream,
        leftover: Vec<u8>,
        request: Request,
        ctx: &ConnectionContext,
    ) -> tokio::task::JoinHandle<Result<ChannelExit, ServerError>> {
        let ctx = ctx.clone();
        tokio::spawn(async move { accept(server_io, leftover, &request, &ctx).await })
    }

    async fn connect(ctx: &ConnectionContext) -> (
        WebSocketStream<DuplexStream>,
        tokio::task::JoinHandle<Result<ChannelExit, ServerError>>,
    ) {
        let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = spawn_accept(server_io, Vec::new(), upgrade_request(Some(KEY)), ctx);
        let head = read_head(&mut client_io).await;
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (client, server)
    }

    #[tokio::test]
    async fn echo_and_close() {
        let ctx = context(true);
        let (mut client, server) = connect(&ctx).await;

        client.send(Message::text("hello")).await.unwrap();
        let echoed = client.next().await.unwrap().unwrap();
        assert_eq!(echoed, Message::text("hello"));
        assert_eq!(ctx.registry.len(), 1);

        client.close(None).await.unwrap();
        let exit = server.await.unwrap().unwrap();
        assert_eq!(exit, ChannelExit::PeerClosed);
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn binary_frames() {
        let ctx = context(true);
        let (mut client, server) = connect(&ctx).await;

        client.send(Message::binary(vec![0xff, 0xfe])).await.unwrap();
        client.send(Message::binary(b"bin".to_vec())).await.unwrap();
        let relayed = client.next().await.unwrap().unwrap();
        assert_eq!(relayed, Message::text("bin"));

        client.close(None).await.unwrap();
        assert_eq!(server.await.unwrap().unwrap(), ChannelExit::PeerClosed);
    }

    #[tokio::test]
    async fn leftover_bytes_are_replayed() {
        let ctx = context(true);
        let (observer, mut observer_rx) =
            ChannelHandle::new(SessionId::from_string("observer".into()));
        assert!(ctx.registry.join(Arc::new(observer)));

        // masked client text frame "hi"
        let leftover = vec![0x81, 0x82, 1, 2, 3, 4, 0x69, 0x6b];
        let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = spawn_accept(server_io, leftover, upgrade_request(Some(KEY)), &ctx);
        let _ = read_head(&mut client_io).await;

        let relayed = observer_rx.recv().await.unwrap();
        assert_eq!(relayed.as_str(), "hi");

        ctx.shutdown.cancel();
        assert_eq!(server.await.unwrap().unwrap(), ChannelExit::Shutdown);
        assert_eq!(ctx.registry.len(), 1);
    }

    #[tokio::test]
    async fn rejected_handshake_never_joins() {
        let ctx = context(true);
        let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = spawn_accept(server_io, Vec::new(), upgrade_request(None), &ctx);

        let mut response = String::new();
        let _ = client_io.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));

        let result = server.await.unwrap();
        assert_matches!(
            result,
            Err(ServerError::Handshake(HandshakeError::MissingKey))
        );
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let mut ctx = context(true);
        ctx.idle_timeout = Duration::from_secs(5);
        ctx.heartbeat_interval = Duration::from_secs(3600);
        let (_client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = spawn_accept(server_io, Vec::new(), upgrade_request(Some(KEY)), &ctx);

        let result = server.await.unwrap();
        assert_matches!(result, Err(ServerError::Timeout(d)) if d == Duration::from_secs(5));
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_sends_close() {
        let ctx = context(true);
        let (mut client, server) = connect(&ctx).await;

        ctx.shutdown.cancel();
        assert_eq!(server.await.unwrap().unwrap(), ChannelExit::Shutdown);
        assert_matches!(client.next().await, Some(Ok(Message::Close(_))));
        assert!(ctx.registry.is_empty());
    }

    #[tokio::test]
    async fn dropped_peer_ends_session() {
        let ctx = context(true);
        let (client, server) = connect(&ctx).await;
        drop(client);

        let result = server.await.unwrap();
        match result {
            Ok(exit) => assert_eq!(exit, ChannelExit::StreamEnded),
            Err(e) => assert!(e.is_graceful_close(), "unexpected {e}"),
        }
        assert!(ctx.registry.is_empty());
    }

    #[test]
    fn tungstenite_errors_map_to_transport() {
        assert!(transport_error(tungstenite::Error::ConnectionClosed).is_graceful_close());
        assert!(
            transport_error(tungstenite::Error::Protocol(
                ProtocolError::ResetWithoutClosingHandshake
            ))
            .is_graceful_close()
        );
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        assert!(transport_error(tungstenite::Error::Io(io_err)).is_graceful_close());
        let protocol = tungstenite::Error::Protocol(ProtocolError::UnmaskedFrameFromClient);
        assert!(!transport_error(protocol).is_graceful_close());
    }
}
