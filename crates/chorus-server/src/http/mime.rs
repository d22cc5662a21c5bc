//! Content-Type lookup by file extension.

use std::path::Path;

/// Fallback for unknown or missing extensions.
pub const DEFAULT_CONTENT_TYPE: &str = "application/text";

/// Content type for a file path, matched case-insensitively on the extension.
pub fn content_type(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return DEFAULT_CONTENT_TYPE;
    };
    match ext.to_ascii_lowercase().as_str() {
        "htm" | "html" | "php" => "text/html",
        "css" => "text/css",
        "txt" => "text/plain",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "swf" => "application/x-shockwave-flash",
        "flv" => "video/x-flv",
        "png" => "image/png",
        "jpe" | "jpeg" | "jpg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "ico" => "image/vnd.microsoft.icon",
        "tiff" | "tif" => "image/tiff",
        "svg" | "svgz" => "image/svg+xml",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
