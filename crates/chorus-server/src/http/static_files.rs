//! Static file responder.
//!
//! Maps a request target onto a file under the document root. Only `GET`
//! and `HEAD` are served; anything else, and any target that is relative or
//! contains `..`, is a `400`.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tracing::{debug, info};

use super::mime::content_type;
use super::request::Request;
use super::response::Response;

/// Produces the response for a non-upgrade request.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Build the response for `request`. Never fails: backend errors become
    /// error responses.
    async fn respond(&self, request: &Request) -> Response;
}

/// Serves files from a document root.
#[derive(Clone, Debug)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    /// Create a responder rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File system path for an already-validated request path.
    ///
    /// A trailing `/` maps to `index.html` in that directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let mut resolved = self.root.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            resolved.push(segment);
        }
        if path.ends_with('/') {
            resolved.push("index.html");
        }
        resolved
    }
}

/// Whether a request target may be mapped to the file system.
pub fn is_legal_target(target: &str) -> bool {
    target.starts_with('/') && !target.contains("..")
}

#[async_trait]
impl Responder for StaticFiles {
    async fn respond(&self, request: &Request) -> Response {
        let keep_alive = request.keep_alive();
        let is_head = request.method == "HEAD";

        if request.method != "GET" && !is_head {
            return Response::bad_request("Unknown HTTP-method", keep_alive);
        }
        if !is_legal_target(&request.target) {
            return Response::bad_request("Illegal request-target", keep_alive).for_head(is_head);
        }

        let path = self.resolve(request.path());
        let (file, len) = match open_file(&path).await {
            Ok(opened) => opened,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(uri = %request.target, file = %path.display(), "not found");
                return Response::not_found(&request.target, keep_alive).for_head(is_head);
            }
            Err(e) => {
                debug!(uri = %request.target, file = %path.display(), error = %e, "open failed");
                return Response::server_error(e, keep_alive).for_head(is_head);
            }
        };

        let content_type = content_type(&path);
        if is_head {
            return Response::Empty {
                content_type,
                len,
                keep_alive,
            };
        }

        info!(uri = %request.target, "sent");
        Response::File {
            file,
            content_type,
            len,
            keep_alive,
        }
    }
}

/// Open a regular file and read its size. Directories count as missing.
async fn open_file(path: &Path) -> io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let meta = file.metadata().await?;
    if meta.is_dir() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "is a directory"));
    }
    Ok((file, meta.len()))
}
