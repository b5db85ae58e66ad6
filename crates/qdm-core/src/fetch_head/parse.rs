//! Parse HTTP response header lines into RemoteInfo.

use super::RemoteInfo;

pub(crate) fn parse_headers(lines: &[String]) -> RemoteInfo {
    let mut info = RemoteInfo::default();
    for line in lines {
        let Some((name, value)) = line.trim().split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            info.content_length = value.parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            info.accept_ranges = value.eq_ignore_ascii_case("bytes");
        } else if name.eq_ignore_ascii_case("etag") {
            info.etag = Some(value.trim_start_matches("W/").trim_matches('"').to_string());
        } else if name.eq_ignore_ascii_case("last-modified") {
            info.last_modified = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-disposition") {
            info.content_disposition = Some(value.to_string());
        }
    }
    info
}

/// Total size from a `Content-Range: bytes a-b/total` header line.
pub(crate) fn parse_content_range_total(line: &str) -> Option<u64> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-range") {
        return None;
    }
    value.trim().rsplit_once('/')?.1.trim().parse().ok()
}

/// Start offset from a `Content-Range: bytes a-b/total` header line.
pub(crate) fn parse_content_range_start(line: &str) -> Option<u64> {
    let (name, value) = line.split_once(':')?;
    if !name.trim().eq_ignore_ascii_case("content-range") {
        return None;
    }
    let spec = value.trim().strip_prefix("bytes")?.trim();
    spec.split_once('-')?.0.trim().parse().ok()
}
