//! Assemble closed chunk files into the final file.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::control::TransferControl;
use crate::error::{CoreError, StorageError, TransferError};
use crate::segmenter::Chunk;
use crate::storage::{chunk_path, remove_chunk_files, PartFile};
use crate::throttle::Limiters;

const BUF_SIZE: usize = 256 * 1024;

/// Copy every chunk into `<final>.part` at its offset, sync, rename into place
/// and delete the chunk files. Returns the final size. Blocking.
///
/// A signal on `control` abandons the merge between buffers; the chunk files
/// stay and the `.part` file is left for the caller to clean up.
pub fn merge_chunks(
    final_path: &Path,
    chunks: &[Chunk],
    limiters: &Limiters,
    control: &TransferControl,
) -> Result<u64, CoreError> {
    if let Some(open) = chunks.iter().find(|c| !c.closed) {
        return Err(CoreError::Invalid(format!(
            "chunk {} is not complete",
            open.index
        )));
    }
    let total: u64 = chunks
        .iter()
        .map(|c| c.len().unwrap_or(c.received))
        .sum();

    let part = PartFile::create(final_path, total)?;

    let mut buf = vec![0u8; BUF_SIZE];
    for chunk in chunks {
        let path = chunk_path(final_path, chunk.index);
        let mut f = File::open(&path).map_err(|e| StorageError::new("open chunk file", &path, e))?;
        let want = chunk.len().unwrap_or(chunk.received);
        let mut copied = 0u64;
        while copied < want {
            let n = f
                .read(&mut buf)
                .map_err(|e| StorageError::new("read chunk file", &path, e))?;
            if n == 0 {
                break;
            }
            let n = (n as u64).min(want - copied) as usize;
            if !limiters.throttle(n as u64, || control.is_interrupted()) {
                return Err(CoreError::Invalid(format!(
                    "merge of {} interrupted",
                    final_path.display()
                )));
            }
            part.write_at(chunk.start + copied, &buf[..n])?;
            copied += n as u64;
        }
        if copied < want {
            return Err(TransferError::PartialTransfer {
                expected: want,
                received: copied,
            }
            .into());
        }
    }
    part.commit()?;
    remove_chunk_files(final_path, chunks.len());
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmenter::plan_chunks;
    use crate::storage::{temp_path, ChunkFile};
    use crate::throttle::TokenBucket;
    use crate::transfer::Signal;

    #[test]
    fn merges_in_offset_order() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("data.bin");
        let source: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut chunks = plan_chunks(Some(1000), 3);
        // Write in reverse order to make sure offsets, not write order, decide placement.
        for c in chunks.iter_mut().rev() {
            let mut f = ChunkFile::open(&chunk_path(&final_path, c.index), 0).unwrap();
            f.append(&source[c.start as usize..c.end.unwrap() as usize]).unwrap();
            c.received = f.len();
            c.closed = true;
        }
        let size = merge_chunks(&final_path, &chunks, &Limiters::default(), &TransferControl::new()).unwrap();
        assert_eq!(size, 1000);
        assert_eq!(std::fs::read(&final_path).unwrap(), source);
        assert!(!chunk_path(&final_path, 0).exists());
        assert!(!temp_path(&final_path).exists());
    }

    #[test]
    fn refuses_open_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let chunks = plan_chunks(Some(10), 2);
        let err = merge_chunks(&dir.path().join("x"), &chunks, &Limiters::default(), &TransferControl::new()).unwrap_err();
        assert!(matches!(err, CoreError::Invalid(_)));
    }

    #[test]
    fn short_chunk_file_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("short.bin");
        let mut chunks = plan_chunks(Some(10), 1);
        let mut f = ChunkFile::open(&chunk_path(&final_path, 0), 0).unwrap();
        f.append(b"1234").unwrap();
        chunks[0].closed = true;
        chunks[0].received = 10;
        let err = merge_chunks(&final_path, &chunks, &Limiters::default(), &TransferControl::new()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Transfer(TransferError::PartialTransfer { expected: 10, received: 4 })
        ));
    }

    #[test]
    fn signal_abandons_a_throttled_merge() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("slow.bin");
        let mut chunks = plan_chunks(Some(64 * 1024), 1);
        let mut f = ChunkFile::open(&chunk_path(&final_path, 0), 0).unwrap();
        f.append(&vec![7u8; 64 * 1024]).unwrap();
        f.sync().unwrap();
        chunks[0].received = f.len();
        chunks[0].closed = true;

        // At 1 KiB/s the copy would take about a minute.
        let limiters = Limiters::default().with(TokenBucket::shared(Some(1024)));
        let control = TransferControl::new();
        let signal = control.clone();
        let cancel = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            signal.request(Signal::Cancel);
        });
        let started = std::time::Instant::now();
        let err = merge_chunks(&final_path, &chunks, &limiters, &control).unwrap_err();
        cancel.join().unwrap();

        assert!(matches!(err, CoreError::Invalid(_)));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert!(!final_path.exists());
        assert!(chunk_path(&final_path, 0).exists());
    }
}
