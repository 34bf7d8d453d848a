// Extension to MIME type table for request and response content types.

const MIME_TYPES: &[(&str, &str)] = &[
    (".js", "application/javascript"),
    (".mjs", "application/javascript"),
    (".json", "application/json"),
    (".map", "application/json"),
    (".css", "text/css"),
    (".html", "text/html"),
    (".htm", "text/html"),
    (".txt", "text/plain"),
    (".csv", "text/csv"),
    (".xml", "application/xml"),
    (".svg", "image/svg+xml"),
    (".png", "image/png"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".gif", "image/gif"),
    (".ico", "image/x-icon"),
    (".webp", "image/webp"),
    (".pdf", "application/pdf"),
    (".wasm", "application/wasm"),
    (".woff", "font/woff"),
    (".woff2", "font/woff2"),
    (".ttf", "font/ttf"),
    (".otf", "font/otf"),
    (".mp4", "video/mp4"),
    (".webm", "video/webm"),
    (".mp3", "audio/mpeg"),
    (".wav", "audio/wav"),
    (".zip", "application/zip"),
    (".ts", "application/typescript"),
];

/// Looks up the MIME type for the extension of the last segment of `path`.
///
/// Returns `(mime, extension)`; unknown or missing extensions fall back to
/// `(default_mime, default_ext)`.
pub fn find_mime_type_by_ext<'a>(
    path: &'a str,
    default_ext: &'a str,
    default_mime: &'a str,
) -> (&'a str, &'a str) {
    let segment = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let Some(dot) = segment.rfind('.') else {
        return (default_mime, default_ext);
    };
    let ext = &segment[dot..];
    MIME_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| (*mime, ext))
        .unwrap_or((default_mime, default_ext))
}

/// MIME type for `path`, `text/plain` when unrecognized.
pub fn mime_type_for(path: &str) -> &str {
    find_mime_type_by_ext(path, ".txt", "text/plain").0
}
