//! Filename derivation for new downloads.
//!
//! A name comes from `Content-Disposition` when the server sends one,
//! otherwise from the last URL path segment, and is sanitized for Linux
//! filesystems. `unique_filename_among` produces the "keep both" rename.

use std::path::Path;

/// Name used when neither the header nor the URL yields anything usable.
const DEFAULT_FILENAME: &str = "download.bin";
const NAME_MAX: usize = 255;

/// Derives a safe filename for saving `url`.
pub fn derive_filename(url: &str, content_disposition: Option<&str>) -> String {
    let candidate = content_disposition
        .and_then(content_disposition_filename)
        .or_else(|| filename_from_url_path(url));
    match candidate.map(|c| sanitize_filename(&c)) {
        Some(s) if !s.is_empty() && s != "." && s != ".." => s,
        _ => DEFAULT_FILENAME.to_string(),
    }
}

/// Lowercased extension of `file_name`, without the dot.
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// First of `name`, `stem (1).ext`, `stem (2).ext`, ... for which `taken` is false.
pub fn unique_filename_among(name: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(name) {
        return name.to_string();
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() => (s, Some(e)),
        _ => (name, None),
    };
    (1u32..)
        .map(|n| match ext {
            Some(e) => format!("{} ({}).{}", stem, n, e),
            None => format!("{} ({})", stem, n),
        })
        .find(|c| !taken(c))
        .unwrap_or_else(|| name.to_string())
}

fn filename_from_url_path(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = percent_decode(segment);
    (!decoded.is_empty()).then_some(decoded)
}

/// `filename*=UTF-8''...` wins over `filename=`.
fn content_disposition_filename(header_value: &str) -> Option<String> {
    let mut plain = None;
    for param in header_value.split(';') {
        let Some((name, v)) = param.trim().split_once('=') else {
            continue;
        };
        let v = v.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let lower = v.to_ascii_lowercase();
                if lower.starts_with("utf-8''") {
                    let decoded = percent_decode(&v[7..]);
                    if !decoded.is_empty() {
                        return Some(decoded);
                    }
                }
            }
            "filename" => {
                let unquoted = v
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .map(|s| s.replace("\\\"", "\"").replace("\\\\", "\\"))
                    .unwrap_or_else(|| v.to_string());
                if !unquoted.is_empty() {
                    plain = Some(unquoted);
                }
            }
            _ => {}
        }
    }
    plain
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Replace path separators and control characters, collapse runs of `_`,
/// trim leading/trailing dots and spaces, cap at 255 bytes.
/// Strip path separators and control characters so `name` stays inside its directory.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c == '/' || c == '\\' || c == '\0' || c.is_control() {
            '_'
        } else {
            c
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let trimmed = out.trim_matches(|c: char| c == '.' || c == ' ');
    let mut end = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
