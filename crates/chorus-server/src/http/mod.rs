//! HTTP/1.x side of a connection.
//!
//! - [`request`]: pure request classification over buffered bytes
//! - [`response`]: closed set of response shapes and their serialization
//! - [`static_files`]: the document-root [`Responder`](static_files::Responder)
//! - [`mime`]: extension to `Content-Type` table
//! - [`session`]: per-connection read/dispatch/respond loop

pub mod mime;
pub mod request;
pub mod response;
pub mod session;
pub mod static_files;

pub use request::{Parse, Request, parse_request};
pub use response::{Response, Status};
pub use session::{HttpExit, run_http_session};
pub use static_files::{Responder, StaticFiles};
