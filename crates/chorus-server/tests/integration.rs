//! End-to-end tests over real TCP: raw HTTP requests and WebSocket clients.

use std::net::SocketAddr;
use std::time::Duration;

use chorus_core::ServerError;
use chorus_server::{ChorusServer, ServerConfig};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    addr: SocketAddr,
    server: ChorusServer,
    handle: JoinHandle<Result<(), ServerError>>,
    _root: tempfile::TempDir,
}

/// Boot a server on an ephemeral port over a small document root.
async fn boot_server(echo_to_sender: bool) -> TestServer {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("index.html"), "<h1>chorus</h1>").unwrap();
    std::fs::write(root.path().join("style.css"), "body { color: red; }").unwrap();
    std::fs::create_dir(root.path().join("img")).unwrap();
    std::fs::write(root.path().join("img/logo.PNG"), [0x89, b'P', b'N', b'G']).unwrap();

    let config = ServerConfig {
        document_root: root.path().to_path_buf(),
        echo_to_sender,
        shutdown_grace_secs: 1,
        ..ServerConfig::default()
    };
    let server = ChorusServer::new(config);
    let (addr, handle) = server.listen().await.unwrap();
    TestServer {
        addr,
        server,
        handle,
        _root: root,
    }
}

/// Send one raw request and read until the server closes.
async fn http(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    let _ = timeout(TIMEOUT, stream.read_to_end(&mut out))
        .await
        .expect("server did not close the connection")
        .unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

fn get(target: &str) -> String {
    format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
}

async fn ws_connect(addr: SocketAddr) -> WsStream {
    let (ws, resp) = connect_async(format!("ws://{addr}/chat")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 101);
    ws
}

async fn wait_for_sessions(server: &ChorusServer, n: usize) {
    timeout(TIMEOUT, async {
        while server.registry().len() != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {n} live sessions, have {}", server.registry().len()));
}

async fn recv_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .unwrap();
        match msg {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

// ── HTTP ──

#[tokio::test]
async fn existing_file_served_with_content_type() {
    let t = boot_server(true).await;
    let resp = http(t.addr, &get("/style.css")).await;
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"), "{resp}");
    assert!(resp.contains("Content-Type: text/css\r\n"));
    assert!(resp.contains("Content-Length: 20\r\n"));
    assert!(resp.contains("Server: chorus/"));
    assert!(resp.ends_with("body { color: red; }"));

    let resp = http(t.addr, &get("/img/logo.PNG")).await;
    assert!(resp.contains("Content-Type: image/png\r\n"));
}

#[tokio::test]
async fn root_serves_index() {
    let t = boot_server(true).await;
    let resp = http(t.addr, &get("/")).await;
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(resp.contains("Content-Type: text/html\r\n"));
    assert!(resp.ends_with("<h1>chorus</h1>"));
}

#[tokio::test]
async fn traversal_rejected_for_every_method() {
    let t = boot_server(true).await;
    for method in ["GET", "HEAD", "POST", "DELETE"] {
        let raw = format!("{method} /../etc/passwd HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n");
        let resp = http(t.addr, &raw).await;
        assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{method}: {resp}");
    }
}

#[tokio::test]
async fn missing_file_is_404() {
    let t = boot_server(true).await;
    let resp = http(t.addr, &get("/nope.html")).await;
    assert!(resp.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(resp.ends_with("The resource '/nope.html' was not found"));
}

#[tokio::test]
async fn unknown_method_is_400() {
    let t = boot_server(true).await;
    let resp = http(
        t.addr,
        "PUT /index.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(resp.ends_with("Unknown HTTP-method"));
}

#[tokio::test]
async fn oversize_body_rejected_without_200() {
    let t = boot_server(true).await;
    let mut stream = TcpStream::connect(t.addr).await.unwrap();
    stream
        .write_all(b"GET /index.html HTTP/1.1\r\nHost: x\r\nContent-Length: 50000\r\n\r\n")
        .await
        .unwrap();

    let mut out = Vec::new();
    let _ = timeout(TIMEOUT, stream.read_to_end(&mut out)).await.unwrap();
    let resp = String::from_utf8_lossy(&out);
    assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{resp}");
    assert!(!resp.contains("200 OK"));
}

#[tokio::test]
async fn keep_alive_serves_several_requests() {
    let t = boot_server(true).await;
    let raw = "GET /style.css HTTP/1.1\r\nHost: x\r\n\r\n\
               HEAD /index.html HTTP/1.1\r\nHost: x\r\n\r\n\
               GET /index.html HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n";
    let resp = http(t.addr, raw).await;
    assert_eq!(resp.matches("HTTP/1.1 200 OK\r\n").count(), 3);
    assert!(resp.ends_with("<h1>chorus</h1>"));
}

#[tokio::test]
async fn bad_websocket_version_is_400() {
    let t = boot_server(true).await;
    let resp = http(
        t.addr,
        "GET /chat HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
         Sec-WebSocket-Version: 7\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(resp.contains("Sec-WebSocket-Version: 13\r\n"));
    assert!(t.server.registry().is_empty());
}

// ── WebSocket broadcast ──

#[tokio::test]
async fn broadcast_reaches_every_session() {
    let t = boot_server(true).await;
    let mut a = ws_connect(t.addr).await;
    let mut b = ws_connect(t.addr).await;
    let mut c = ws_connect(t.addr).await;
    wait_for_sessions(&t.server, 3).await;

    a.send(Message::text("hello")).await.unwrap();
    assert_eq!(recv_text(&mut a).await, "hello");
    assert_eq!(recv_text(&mut b).await, "hello");
    assert_eq!(recv_text(&mut c).await, "hello");

    b.close(None).await.unwrap();
    wait_for_sessions(&t.server, 2).await;

    c.send(Message::text("bye")).await.unwrap();
    assert_eq!(recv_text(&mut a).await, "bye");
    assert_eq!(recv_text(&mut c).await, "bye");
}

#[tokio::test]
async fn sender_excluded_without_echo() {
    let t = boot_server(false).await;
    let mut a = ws_connect(t.addr).await;
    let mut b = ws_connect(t.addr).await;
    wait_for_sessions(&t.server, 2).await;

    a.send(Message::text("first")).await.unwrap();
    assert_eq!(recv_text(&mut b).await, "first");
    b.send(Message::text("second")).await.unwrap();
    // a sees b's message and never its own
    assert_eq!(recv_text(&mut a).await, "second");
}

#[tokio::test]
async fn per_sender_order_preserved() {
    let t = boot_server(true).await;
    let mut a = ws_connect(t.addr).await;
    let mut b = ws_connect(t.addr).await;
    wait_for_sessions(&t.server, 2).await;

    for i in 0..50 {
        a.send(Message::text(format!("m{i}"))).await.unwrap();
    }
    for i in 0..50 {
        assert_eq!(recv_text(&mut b).await, format!("m{i}"));
    }
}

#[tokio::test]
async fn abrupt_disconnect_does_not_disturb_others() {
    let t = boot_server(true).await;
    let mut a = ws_connect(t.addr).await;
    let b = ws_connect(t.addr).await;
    let mut c = ws_connect(t.addr).await;
    wait_for_sessions(&t.server, 3).await;

    drop(b);
    for i in 0..20 {
        a.send(Message::text(format!("{i}"))).await.unwrap();
    }
    for i in 0..20 {
        assert_eq!(recv_text(&mut c).await, format!("{i}"));
    }
    wait_for_sessions(&t.server, 2).await;
}

#[tokio::test]
async fn shutdown_closes_channels_and_stops_listener() {
    let t = boot_server(true).await;
    let mut a = ws_connect(t.addr).await;
    wait_for_sessions(&t.server, 1).await;

    t.server.shutdown().shutdown();
    let closing = timeout(TIMEOUT, a.next()).await.unwrap();
    assert!(matches!(closing, None | Some(Ok(Message::Close(_))) | Some(Err(_))));

    let result = timeout(TIMEOUT, t.handle).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(t.server.registry().is_empty());
    assert!(TcpStream::connect(t.addr).await.is_err());
}
