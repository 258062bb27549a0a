/// File extension for an output mime type; unknown types store as png.
#[must_use]
pub fn ext_from_mime(mime: &str) -> &'static str {
    let mime = mime.to_ascii_lowercase();
    if mime.contains("jpeg") || mime.contains("jpg") {
        "jpg"
    } else if mime.contains("webp") {
        "webp"
    } else if mime.contains("svg") {
        "svg"
    } else {
        "png"
    }
}

/// Best-effort mime guess for a stored reference image path.
///
/// Used when the storage backend does not return a content type header.
#[must_use]
pub fn guess_mime_from_path(path: &str) -> &'static str {
    let path = path.to_ascii_lowercase();
    if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "image/jpeg"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".png") {
        "image/png"
    } else {
        "image/jpeg"
    }
}
