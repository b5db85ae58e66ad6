//! Chunk type and range planning.

use serde::{Deserialize, Serialize};

/// A single chunk: byte range `[start, end)` of the remote resource and how
/// many bytes of it are already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (exclusive); `None` for a single stream of unknown length.
    pub end: Option<u64>,
    /// Bytes confirmed on disk, relative to `start`.
    pub received: u64,
    /// All bytes of the range are on disk and flushed.
    pub closed: bool,
}

impl Chunk {
    /// Length of this chunk in bytes, when known.
    pub fn len(&self) -> Option<u64> {
        self.end.map(|e| e.saturating_sub(self.start))
    }

    /// Bytes still missing, when the length is known.
    pub fn remaining(&self) -> Option<u64> {
        self.len().map(|l| l.saturating_sub(self.received))
    }

    /// Absolute offset of the next byte to fetch.
    pub fn next_offset(&self) -> u64 {
        self.start + self.received
    }

    /// HTTP Range header value for the unfetched part (inclusive end).
    /// `None` when the chunk is the whole resource from byte zero.
    pub fn range_header_value(&self) -> Option<String> {
        match self.end {
            Some(end) if end > self.next_offset() => {
                Some(format!("bytes={}-{}", self.next_offset(), end - 1))
            }
            Some(_) => None,
            None if self.next_offset() > 0 => Some(format!("bytes={}-", self.next_offset())),
            None => None,
        }
    }
}

/// Number of chunks to use for a resource.
///
/// One chunk when the size is unknown or ranges are unsupported; otherwise
/// as many as `max_chunks` allows while keeping each at least `min_chunk_bytes`.
pub fn chunk_count(
    total_size: Option<u64>,
    accept_ranges: bool,
    max_chunks: usize,
    min_chunk_bytes: u64,
) -> usize {
    match total_size {
        Some(total) if accept_ranges && total > 0 => {
            let by_size = total.div_ceil(min_chunk_bytes.max(1));
            (by_size.min(max_chunks.max(1) as u64)) as usize
        }
        _ => 1,
    }
}

/// Builds a chunk plan for a given total size and chunk count.
///
/// Chunks are as equal as possible; the first `total % count` chunks get one
/// extra byte. Unknown size yields one open-ended chunk.
pub fn plan_chunks(total_size: Option<u64>, chunk_count: usize) -> Vec<Chunk> {
    let total = match total_size {
        Some(t) => t,
        None => {
            return vec![Chunk {
                index: 0,
                start: 0,
                end: None,
                received: 0,
                closed: false,
            }]
        }
    };
    if total == 0 {
        return vec![Chunk {
            index: 0,
            start: 0,
            end: Some(0),
            received: 0,
            closed: false,
        }];
    }

    let count = (chunk_count.max(1) as u64).min(total);
    let base = total / count;
    let remainder = total % count;

    let mut out = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    for i in 0..count {
        let len = base + u64::from(i < remainder);
        out.push(Chunk {
            index: i as usize,
            start: offset,
            end: Some(offset + len),
            received: 0,
            closed: false,
        });
        offset += len;
    }
    out
}
