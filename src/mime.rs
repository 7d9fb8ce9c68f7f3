use std::path::Path;

/// Fallback when the extension is unknown or absent
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Map a lowercase file extension to its content type
pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    let content_type = match ext {
        // Text types
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",

        // Application types
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",
        "wasm" => "application/wasm",
        "swf" => "application/x-shockwave-flash",

        // Image types
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",

        // Audio and video
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",

        // Font types
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",

        _ => return None,
    };

    Some(content_type)
}

/// Get the content type for a file based on its extension
pub fn content_type(path: &Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(|e| content_type_for_extension(&e.to_ascii_lowercase()))
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}
