//! Per-chunk append files.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Path of chunk `index` for a download landing at `final_path`.
pub fn chunk_path(final_path: &Path, index: usize) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(format!(".chunk{}", index));
    PathBuf::from(o)
}

/// On-disk length of a chunk file; `None` when it does not exist.
pub fn chunk_file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

/// Best-effort removal of the chunk files of a download.
pub fn remove_chunk_files(final_path: &Path, count: usize) {
    for i in 0..count {
        let p = chunk_path(final_path, i);
        if let Err(e) = std::fs::remove_file(&p) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %p.display(), error = %e, "failed to remove chunk file");
            }
        }
    }
}

/// Append handle for one chunk, positioned at its confirmed length.
pub struct ChunkFile {
    file: File,
    path: PathBuf,
    len: u64,
}

impl ChunkFile {
    /// Open (or create) the chunk file and cut it back to `received` bytes,
    /// discarding anything written after the last confirmed offset.
    pub fn open(path: &Path, received: u64) -> Result<Self, StorageError> {
        let mut file = File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StorageError::new("open chunk file", path, e))?;
        file.set_len(received)
            .map_err(|e| StorageError::new("truncate chunk file", path, e))?;
        use std::io::{Seek, SeekFrom};
        file.seek(SeekFrom::End(0))
            .map_err(|e| StorageError::new("seek chunk file", path, e))?;
        Ok(ChunkFile {
            file,
            path: path.to_path_buf(),
            len: received,
        })
    }

    pub fn append(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.file
            .write_all(data)
            .map_err(|e| StorageError::new("write chunk file", &self.path, e))?;
        self.len += data.len() as u64;
        Ok(())
    }

    /// Flush written bytes to disk.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.file
            .sync_data()
            .map_err(|e| StorageError::new("sync chunk file", &self.path, e))
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
