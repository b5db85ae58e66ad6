//! Remote metadata probing.
//!
//! Sends a HEAD request through libcurl to learn the size, range support and
//! validators (ETag / Last-Modified) of a resource. When HEAD is refused or
//! does not advertise `Accept-Ranges: bytes`, a `Range: bytes=0-0` GET decides
//! range support from the status code.

mod parse;

use std::str;
use std::time::Duration;

pub(crate) use parse::{parse_content_range_start, parse_content_range_total, parse_headers};

use crate::error::TransferError;

/// What the server told us about a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteInfo {
    /// Total size in bytes, when known.
    pub content_length: Option<u64>,
    /// Server honors `Range: bytes=` requests.
    pub accept_ranges: bool,
    /// `ETag` value without quotes.
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// `Content-Disposition` value (filename hint).
    pub content_disposition: Option<String>,
}

/// Probe `url`. Blocking; call from `spawn_blocking` in async code.
pub fn probe(url: &str, connect_timeout: Duration) -> Result<RemoteInfo, TransferError> {
    match head(url, connect_timeout) {
        Ok(info) if info.accept_ranges => Ok(info),
        Ok(info) => {
            let ranged = range_probe(url, connect_timeout).ok();
            Ok(merge(info, ranged))
        }
        Err(head_err) => {
            tracing::debug!(url, error = %head_err, "HEAD refused, trying range GET");
            range_probe(url, connect_timeout).map_err(|_| head_err)
        }
    }
}

fn merge(head: RemoteInfo, ranged: Option<RemoteInfo>) -> RemoteInfo {
    match ranged {
        Some(r) => RemoteInfo {
            content_length: head.content_length.or(r.content_length),
            accept_ranges: r.accept_ranges,
            etag: head.etag.or(r.etag),
            last_modified: head.last_modified.or(r.last_modified),
            content_disposition: head.content_disposition.or(r.content_disposition),
        },
        None => head,
    }
}

fn head(url: &str, connect_timeout: Duration) -> Result<RemoteInfo, TransferError> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(TransferError::Curl)?;
    easy.nobody(true).map_err(TransferError::Curl)?;
    let (code, lines) = perform(easy, connect_timeout, false)?;
    if !(200..300).contains(&code) {
        return Err(TransferError::Http(code));
    }
    Ok(parse_headers(&lines))
}

/// GET the first byte. 206 proves range support; 200 means the server ignores ranges.
fn range_probe(url: &str, connect_timeout: Duration) -> Result<RemoteInfo, TransferError> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(TransferError::Curl)?;
    easy.range("0-0").map_err(TransferError::Curl)?;
    let (code, lines) = perform(easy, connect_timeout, true)?;
    let mut info = parse_headers(&lines);
    match code {
        206 => {
            info.accept_ranges = true;
            info.content_length = lines.iter().find_map(|l| parse_content_range_total(l));
            Ok(info)
        }
        200..=299 => {
            info.accept_ranges = false;
            Ok(info)
        }
        _ => Err(TransferError::Http(code)),
    }
}

/// Run the request collecting header lines of the final response. Body bytes
/// are discarded; with `stop_after_headers` the first body byte aborts the
/// transfer, which is reported as success.
fn perform(
    mut easy: curl::easy::Easy,
    connect_timeout: Duration,
    stop_after_headers: bool,
) -> Result<(u32, Vec<String>), TransferError> {
    let mut lines: Vec<String> = Vec::new();
    easy.follow_location(true).map_err(TransferError::Curl)?;
    easy.connect_timeout(connect_timeout)
        .map_err(TransferError::Curl)?;
    easy.timeout(Duration::from_secs(30))
        .map_err(TransferError::Curl)?;

    let result = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    let line = s.trim_end().to_string();
                    // A new status line starts a new response (redirect hop).
                    if line.starts_with("HTTP/") {
                        lines.clear();
                    }
                    lines.push(line);
                }
                true
            })
            .map_err(TransferError::Curl)?;
        transfer
            .write_function(|data| Ok(if stop_after_headers { 0 } else { data.len() }))
            .map_err(TransferError::Curl)?;
        transfer.perform()
    };
    match result {
        Ok(()) => {}
        Err(e) if stop_after_headers && e.is_write_error() => {}
        Err(e) => return Err(TransferError::Curl(e)),
    }
    let code = easy.response_code().map_err(TransferError::Curl)?;
    Ok((code, lines))
}
