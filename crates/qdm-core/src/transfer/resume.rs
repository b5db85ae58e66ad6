//! Decide whether a partially downloaded job can continue where it stopped.

use crate::error::CoreError;
use crate::fetch_head::RemoteInfo;
use crate::model::Job;
use crate::segmenter::Chunk;
use crate::storage::{chunk_file_len, chunk_path};

fn changed(stored: &Option<String>, remote: &Option<String>) -> bool {
    matches!(stored, Some(s) if remote.as_deref() != Some(s.as_str()))
}

/// Checks the source and the chunk files against what the job recorded.
///
/// On success returns the chunk list with every unfinished chunk positioned
/// at its on-disk length (capped at the chunk size). A job with no chunks yet
/// is trivially resumable.
pub fn check_resume(job: &Job, remote: &RemoteInfo) -> Result<Vec<Chunk>, CoreError> {
    if job.chunks.is_empty() {
        return Ok(Vec::new());
    }
    if !job.resumable {
        return Err(CoreError::ResumeUnsupported(
            "source did not accept range requests when the download started".into(),
        ));
    }
    if !remote.accept_ranges {
        return Err(CoreError::ResumeUnsupported(
            "source no longer accepts range requests".into(),
        ));
    }
    let mut what = Vec::new();
    if changed(&job.etag, &remote.etag) {
        what.push("ETag");
    }
    if changed(&job.last_modified, &remote.last_modified) {
        what.push("Last-Modified");
    }
    if job.total_size.is_some() && job.total_size != remote.content_length {
        what.push("size");
    }
    if !what.is_empty() {
        return Err(CoreError::ResumeUnsupported(format!(
            "remote file changed ({})",
            what.join(", ")
        )));
    }

    let final_path = job.final_path();
    let mut chunks = job.chunks.clone();
    for c in chunks.iter_mut() {
        let path = chunk_path(&final_path, c.index);
        let on_disk = chunk_file_len(&path);
        match on_disk {
            None if c.received > 0 || c.closed => {
                return Err(CoreError::ResumeUnsupported(format!(
                    "chunk file {} is missing",
                    path.display()
                )))
            }
            Some(len) if len < c.received => {
                return Err(CoreError::ResumeUnsupported(format!(
                    "chunk file {} holds {} bytes, expected at least {}",
                    path.display(),
                    len,
                    c.received
                )))
            }
            _ => {}
        }
        if !c.closed {
            let len = on_disk.unwrap_or(0);
            c.received = c.len().map_or(len, |cap| len.min(cap));
        }
    }
    Ok(chunks)
}
