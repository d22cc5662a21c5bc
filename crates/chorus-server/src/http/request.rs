//! Incremental HTTP/1.x request classification.
//!
//! [`parse_request`] looks at everything buffered for the current cycle and
//! reports a complete [`Request`], a need for more bytes, or a [`ParseError`].
//! It performs no I/O; bytes past the reported `consumed` length belong to
//! the next request (or, after an upgrade, to the WebSocket stream).

use chorus_core::ParseError;

/// Maximum number of headers accepted in one request.
pub const MAX_HEADERS: usize = 64;

/// Outcome of one classification attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Parse {
    /// A full request is buffered; `consumed` bytes belong to it.
    Complete {
        /// The parsed request.
        request: Request,
        /// Bytes of the buffer taken by this request.
        consumed: usize,
    },
    /// The request is not complete yet.
    Partial,
}

/// A parsed request head plus its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method as sent (`GET`, `HEAD`, ...).
    pub method: String,
    /// Raw request target.
    pub target: String,
    /// HTTP minor version (`1` for HTTP/1.1).
    pub version: u8,
    /// Header name/value pairs in arrival order.
    pub headers: Vec<(String, String)>,
    /// Body bytes as declared by `Content-Length`.
    pub body: Vec<u8>,
}

impl Request {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether any comma-separated value of `name` equals `token`
    /// (case-insensitive).
    pub fn header_has_token(&self, name: &str, token: &str) -> bool {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Whether this request asks to become a WebSocket.
    ///
    /// Requires HTTP/1.1 or later, `GET`, a `Connection: upgrade` token and an
    /// `Upgrade: websocket` token.
    pub fn is_upgrade(&self) -> bool {
        self.version >= 1
            && self.method == "GET"
            && self.header_has_token("Connection", "upgrade")
            && self.header_has_token("Upgrade", "websocket")
    }

    /// Whether the connection should stay open after the response.
    pub fn keep_alive(&self) -> bool {
        if self.version >= 1 {
            !self.header_has_token("Connection", "close")
        } else {
            self.header_has_token("Connection", "keep-alive")
        }
    }

    /// Target with any query string removed.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }
}

/// Classify the bytes buffered so far.
///
/// `max_bytes` caps the header section plus the declared body. A body that
/// would exceed the cap is rejected as soon as its `Content-Length` is seen,
/// without waiting for the bytes.
pub fn parse_request(buf: &[u8], max_bytes: usize) -> Result<Parse, ParseError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => {
            if buf.len() > max_bytes {
                return Err(ParseError::HeadersTooLarge { limit: max_bytes });
            }
            return Ok(Parse::Partial);
        }
        Err(httparse::Error::TooManyHeaders) => return Err(ParseError::TooManyHeaders),
        Err(e) => return Err(ParseError::Malformed(e.to_string())),
    };
    if head_len > max_bytes {
        return Err(ParseError::HeadersTooLarge { limit: max_bytes });
    }

    let headers: Vec<(String, String)> = req
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect();

    if headers
        .iter()
        .any(|(n, _)| n.eq_ignore_ascii_case("Transfer-Encoding"))
    {
        return Err(ParseError::UnsupportedTransferEncoding);
    }

    let body_len = content_length(&headers)?;
    let total = (head_len as u64).saturating_add(body_len);
    if total > max_bytes as u64 {
        return Err(ParseError::BodyTooLarge {
            length: body_len,
            limit: max_bytes,
        });
    }
    // bounded by max_bytes above
    let total = total as usize;
    if buf.len() < total {
        return Ok(Parse::Partial);
    }

    let request = Request {
        method: req.method.unwrap_or_default().to_string(),
        target: req.path.unwrap_or_default().to_string(),
        version: req.version.unwrap_or(1),
        headers,
        body: buf[head_len..total].to_vec(),
    };
    Ok(Parse::Complete {
        request,
        consumed: total,
    })
}

/// Declared body length; all `Content-Length` headers must agree.
fn content_length(headers: &[(String, String)]) -> Result<u64, ParseError> {
    let mut length: Option<u64> = None;
    for (_, value) in headers
        .iter()
        .filter(|(n, _)| n.eq_ignore_ascii_case("Content-Length"))
    {
        let parsed: u64 = value
            .parse()
            .map_err(|_| ParseError::InvalidContentLength)?;
        match length {
            Some(existing) if existing != parsed => return Err(ParseError::InvalidContentLength),
            _ => length = Some(parsed),
        }
    }
    Ok(length.unwrap_or(0))
}
