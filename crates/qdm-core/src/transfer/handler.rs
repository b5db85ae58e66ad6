//! Easy2 handler for one chunk: validates the response before the first body
//! byte, throttles, appends to the chunk file and publishes the confirmed length.

use std::str;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::control::TransferControl;
use crate::error::{StorageError, TransferError};
use crate::fetch_head::parse_content_range_start;
use crate::storage::ChunkFile;
use crate::throttle::Limiters;

pub(super) struct ChunkHandler {
    pub(super) file: Option<ChunkFile>,
    /// Absolute offset requested (the `Range` start); 0 for a plain GET.
    pub(super) request_offset: u64,
    pub(super) ranged_request: bool,
    /// Bytes the chunk file may hold in total; `None` for unknown length.
    pub(super) capacity: Option<u64>,
    pub(super) response_headers: Vec<String>,
    /// None = not yet checked.
    pub(super) response_ok: Option<bool>,
    pub(super) failure: Option<HandlerFailure>,
    pub(super) control: TransferControl,
    pub(super) limiters: Limiters,
    pub(super) counters: Arc<Vec<AtomicU64>>,
    pub(super) index: usize,
}

pub(super) enum HandlerFailure {
    Transfer(TransferError),
    Storage(StorageError),
}

fn status_of(headers: &[String]) -> Option<u32> {
    let first = headers.first()?;
    first.split_whitespace().nth(1)?.parse().ok()
}

impl ChunkHandler {
    fn check_response(&mut self) -> bool {
        let status = status_of(&self.response_headers);
        let ok = match status {
            Some(206) if self.ranged_request => {
                let start = self
                    .response_headers
                    .iter()
                    .find_map(|l| parse_content_range_start(l));
                if start == Some(self.request_offset) {
                    true
                } else {
                    self.failure = Some(HandlerFailure::Transfer(
                        TransferError::InvalidRangeResponse(format!(
                            "asked for offset {}, server sent {:?}",
                            self.request_offset, start
                        )),
                    ));
                    false
                }
            }
            Some(code) if self.ranged_request && (200..300).contains(&code) => {
                self.failure = Some(HandlerFailure::Transfer(
                    TransferError::InvalidRangeResponse(format!(
                        "expected 206 Partial Content, got {}",
                        code
                    )),
                ));
                false
            }
            Some(code) if (200..300).contains(&code) => true,
            Some(code) => {
                self.failure = Some(HandlerFailure::Transfer(TransferError::Http(code)));
                false
            }
            None => {
                self.failure = Some(HandlerFailure::Transfer(
                    TransferError::InvalidRangeResponse("missing status line".into()),
                ));
                false
            }
        };
        self.response_ok = Some(ok);
        ok
    }
}

impl curl::easy::Handler for ChunkHandler {
    fn header(&mut self, data: &[u8]) -> bool {
        if let Ok(s) = str::from_utf8(data) {
            let line = s.trim_end();
            if line.starts_with("HTTP/") {
                self.response_headers.clear();
            }
            if !line.is_empty() {
                self.response_headers.push(line.to_string());
            }
        }
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, curl::easy::WriteError> {
        if self.control.is_interrupted() {
            return Ok(0);
        }
        if self.response_ok.is_none() && !self.check_response() {
            return Ok(0);
        }
        if self.response_ok == Some(false) {
            return Ok(0);
        }
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };
        let take = match self.capacity {
            Some(cap) => (cap.saturating_sub(file.len()) as usize).min(data.len()),
            None => data.len(),
        };
        if let Err(e) = file.append(&data[..take]) {
            self.failure = Some(HandlerFailure::Storage(e));
            return Ok(0);
        }
        if let Some(c) = self.counters.get(self.index) {
            c.store(file.len(), Ordering::Release);
        }
        let control = &self.control;
        if !self.limiters.throttle(take as u64, || control.is_interrupted()) {
            return Ok(0);
        }
        Ok(data.len())
    }

    fn progress(&mut self, _dltotal: f64, _dlnow: f64, _ultotal: f64, _ulnow: f64) -> bool {
        !self.control.is_interrupted()
    }
}
