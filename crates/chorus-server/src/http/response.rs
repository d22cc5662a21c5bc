//! HTTP responses and their serialization.
//!
//! The set of response shapes is closed: a file streamed from disk, a
//! header-only reply to `HEAD`, or a short text error.

use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Value of the `Server` header on every response.
pub const SERVER_NAME: &str = concat!("chorus/", env!("CARGO_PKG_VERSION"));

/// Status codes the server emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// 101 Switching Protocols.
    SwitchingProtocols,
    /// 200 OK.
    Ok,
    /// 400 Bad Request.
    BadRequest,
    /// 404 Not Found.
    NotFound,
    /// 500 Internal Server Error.
    InternalServerError,
}

impl Status {
    /// Numeric status code.
    pub fn code(self) -> u16 {
        match self {
            Self::SwitchingProtocols => 101,
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::InternalServerError => 500,
        }
    }

    /// Canonical reason phrase.
    pub fn reason(self) -> &'static str {
        match self {
            Self::SwitchingProtocols => "Switching Protocols",
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::InternalServerError => "Internal Server Error",
        }
    }
}

/// A response ready to be written to the connection.
#[derive(Debug)]
pub enum Response {
    /// `200` with the file's bytes as the body.
    File {
        /// Open handle positioned at the start.
        file: File,
        /// Content type for the file extension.
        content_type: &'static str,
        /// File size in bytes.
        len: u64,
        /// Keep the connection open afterwards.
        keep_alive: bool,
    },
    /// `200` headers for a `HEAD` request, no body.
    Empty {
        /// Content type the `GET` would have carried.
        content_type: &'static str,
        /// Length the `GET` body would have had.
        len: u64,
        /// Keep the connection open afterwards.
        keep_alive: bool,
    },
    /// An error status with a short `text/html` explanation.
    Error {
        /// Status to send.
        status: Status,
        /// Body text.
        message: String,
        /// Keep the connection open afterwards.
        keep_alive: bool,
        /// Send headers only (reply to `HEAD`).
        head_only: bool,
    },
}

impl Response {
    /// `400` response.
    pub fn bad_request(why: impl Into<String>, keep_alive: bool) -> Self {
        Self::Error {
            status: Status::BadRequest,
            message: why.into(),
            keep_alive,
            head_only: false,
        }
    }

    /// `404` response naming the missing target.
    pub fn not_found(target: &str, keep_alive: bool) -> Self {
        Self::Error {
            status: Status::NotFound,
            message: format!("The resource '{target}' was not found"),
            keep_alive,
            head_only: false,
        }
    }

    /// `500` response carrying the backend error text.
    pub fn server_error(what: impl std::fmt::Display, keep_alive: bool) -> Self {
        Self::Error {
            status: Status::InternalServerError,
            message: format!("An error occured: {what}"),
            keep_alive,
            head_only: false,
        }
    }

    /// Suppress the body when answering `HEAD`.
    #[must_use]
    pub fn for_head(self, is_head: bool) -> Self {
        match self {
            Self::Error {
                status,
                message,
                keep_alive,
                ..
            } => Self::Error {
                status,
                message,
                keep_alive,
                head_only: is_head,
            },
            other => other,
        }
    }

    /// Status this response carries.
    pub fn status(&self) -> Status {
        match self {
            Self::File { .. } | Self::Empty { .. } => Status::Ok,
            Self::Error { status, .. } => *status,
        }
    }

    /// Whether the connection stays open after this response.
    pub fn keep_alive(&self) -> bool {
        match self {
            Self::File { keep_alive, .. }
            | Self::Empty { keep_alive, .. }
            | Self::Error { keep_alive, .. } => *keep_alive,
        }
    }

    /// Serialize the status line and headers.
    pub fn head(&self, version: u8) -> String {
        let (content_type, len) = match self {
            Self::File {
                content_type, len, ..
            }
            | Self::Empty {
                content_type, len, ..
            } => (*content_type, *len),
            Self::Error { message, .. } => ("text/html", message.len() as u64),
        };
        let status = self.status();
        let connection = if self.keep_alive() {
            "keep-alive"
        } else {
            "close"
        };
        format!(
            "HTTP/1.{version} {} {}\r\nServer: {SERVER_NAME}\r\nContent-Type: {content_type}\r\n\
             Content-Length: {len}\r\nConnection: {connection}\r\n\r\n",
            status.code(),
            status.reason(),
        )
    }

    /// Write the full response and flush.
    pub async fn write_to<W>(self, out: &mut W, version: u8) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        out.write_all(self.head(version).as_bytes()).await?;
        match self {
            Self::File { mut file, len, .. } => {
                let copied = tokio::io::copy(&mut file, out).await?;
                if copied != len {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("file changed while sending: {copied} of {len} bytes"),
                    ));
                }
            }
            Self::Empty { .. } => {}
            Self::Error {
                message, head_only, ..
            } => {
                if !head_only {
                    out.write_all(message.as_bytes()).await?;
                }
            }
        }
        out.flush().await
    }
}
