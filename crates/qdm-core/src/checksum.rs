//! SHA-256 verification of finished downloads.
//!
//! Runs after the merge, never inline with chunk writes.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{CoreError, StorageError, TransferError};

const BUF_SIZE: usize = 64 * 1024;

/// SHA-256 of a file as lowercase hex.
pub fn sha256_path(path: &Path) -> Result<String, StorageError> {
    let mut f = File::open(path).map_err(|e| StorageError::new("open", path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .map_err(|e| StorageError::new("read", path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compare the file digest with `expected` (hex, case-insensitive).
pub fn verify_sha256(path: &Path, expected: &str) -> Result<(), CoreError> {
    let actual = sha256_path(path)?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(TransferError::ChecksumMismatch {
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        }
        .into())
    }
}
