//! Disk I/O and file lifecycle.
//!
//! Each chunk is streamed into its own file (`<final>.chunk<N>`). Once every
//! chunk is closed they are assembled into a preallocated `<final>.part` with
//! offset writes, synced and atomically renamed to the final name.

mod chunk_file;
mod part_file;

pub use chunk_file::{chunk_file_len, chunk_path, remove_chunk_files, ChunkFile};
pub use part_file::PartFile;

use std::path::{Path, PathBuf};

/// Path for the temp file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(".part");
    PathBuf::from(o)
}
