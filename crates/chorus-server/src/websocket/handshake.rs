//! Server side of the RFC 6455 opening handshake.
//!
//! The HTTP session has already parsed the upgrade request; this module
//! checks it and produces the raw response bytes. Framing after the `101` is
//! left to tungstenite.

use chorus_core::HandshakeError;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::http::request::Request;
use crate::http::response::SERVER_NAME;

/// Only protocol version the server speaks.
pub const WEBSOCKET_VERSION: &str = "13";

/// Product token sent on the `101` response.
pub const PRODUCT: &str = "websocket-chat-multi";

/// Validate an upgrade request and compute its `Sec-WebSocket-Accept` value.
pub fn accept_key(request: &Request) -> Result<String, HandshakeError> {
    if !request.is_upgrade() {
        return Err(HandshakeError::NotUpgrade);
    }
    match request.header("Sec-WebSocket-Version") {
        Some(WEBSOCKET_VERSION) => {}
        other => {
            return Err(HandshakeError::UnsupportedVersion(
                other.map(str::to_string),
            ));
        }
    }
    let key = request
        .header("Sec-WebSocket-Key")
        .filter(|k| !k.is_empty())
        .ok_or(HandshakeError::MissingKey)?;
    Ok(derive_accept_key(key.as_bytes()))
}

/// `101 Switching Protocols` response head.
pub fn switching_protocols(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         Server: {SERVER_NAME} {PRODUCT}\r\n\r\n"
    )
}

/// `400` response for a rejected upgrade. The connection closes afterwards.
pub fn rejection(err: &HandshakeError) -> String {
    let body = err.to_string();
    let version_hint = if matches!(err, HandshakeError::UnsupportedVersion(_)) {
        format!("Sec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n")
    } else {
        String::new()
    };
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Server: {SERVER_NAME}\r\n\
         {version_hint}\
         Content-Type: text/html\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    )
}
