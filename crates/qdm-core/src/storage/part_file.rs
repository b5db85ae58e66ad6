//! The `.part` file chunks are assembled into before the final rename.

use std::fs::File;
use std::path::{Path, PathBuf};

use super::temp_path;
use crate::error::StorageError;

/// Merge target for one download. Offsets are absolute file positions, so
/// chunks may be copied in any order.
pub struct PartFile {
    file: File,
    path: PathBuf,
    final_path: PathBuf,
}

impl PartFile {
    /// Create (or truncate) `<final>.part` and reserve `size` bytes for it.
    pub fn create(final_path: &Path, size: u64) -> Result<Self, StorageError> {
        let path = temp_path(final_path);
        let file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| StorageError::new("create", &path, e))?;
        let part = PartFile {
            file,
            path,
            final_path: final_path.to_path_buf(),
        };
        part.reserve(size)?;
        Ok(part)
    }

    fn reserve(&self, size: u64) -> Result<(), StorageError> {
        if size == 0 {
            return Ok(());
        }
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: the descriptor belongs to `self.file` and stays open for the call.
            let r = unsafe { libc::posix_fallocate(self.file.as_raw_fd(), 0, size as libc::off_t) };
            if r == 0 {
                return Ok(());
            }
            tracing::debug!(errno = r, path = %self.path.display(), "fallocate unavailable, using set_len");
        }
        self.file
            .set_len(size)
            .map_err(|e| StorageError::new("preallocate", &self.path, e))
    }

    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        use std::os::unix::fs::FileExt;
        self.file
            .write_all_at(data, offset)
            .map_err(|e| StorageError::new("write", &self.path, e))
    }

    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), StorageError> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = &self.file;
        f.seek(SeekFrom::Start(offset))
            .and_then(|_| f.write_all(data))
            .map_err(|e| StorageError::new("write", &self.path, e))
    }

    /// Flush to disk and rename over the final path.
    pub fn commit(self) -> Result<PathBuf, StorageError> {
        self.file
            .sync_all()
            .map_err(|e| StorageError::new("sync", &self.path, e))?;
        drop(self.file);
        std::fs::rename(&self.path, &self.final_path)
            .map_err(|e| StorageError::new("rename into place", &self.final_path, e))?;
        Ok(self.final_path)
    }
}
