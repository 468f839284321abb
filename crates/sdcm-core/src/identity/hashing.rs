//! Streaming content identity for model files.
//!
//! One read pass feeds both the SHA-256 and the CRC32 (IEEE) hasher, so a
//! multi-gigabyte checkpoint is only read from disk once.

use crate::config::ScanConfig;
use crate::error::{Result, SdcmError};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Identity of a file's byte content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentIdentity {
    /// SHA-256 as uppercase hex.
    pub sha256: String,
    /// Legacy CRC32 as uppercase hex of the little-endian checksum bytes.
    pub crc32: String,
    /// Bytes read.
    pub size: u64,
}

/// Hash a file's content.
///
/// Fails with an I/O error carrying the path if the file cannot be opened or
/// read to completion; no identity is returned for a partial read.
pub fn compute_identity(path: impl AsRef<Path>) -> Result<ContentIdentity> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| SdcmError::io_with_path(e, path))?;

    let mut sha256_hasher = Sha256::new();
    let mut crc_hasher = crc32fast::Hasher::new();
    let mut size: u64 = 0;

    let mut buffer = vec![0u8; ScanConfig::HASH_CHUNK_SIZE];
    loop {
        let bytes_read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SdcmError::io_with_path(e, path)),
        };

        sha256_hasher.update(&buffer[..bytes_read]);
        crc_hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok(ContentIdentity {
        sha256: hex::encode_upper(sha256_hasher.finalize()),
        crc32: legacy_crc_hex(crc_hasher.finalize()),
        size,
    })
}

/// Hash a file on the blocking thread pool.
pub async fn compute_identity_async(path: impl AsRef<Path>) -> Result<ContentIdentity> {
    let path = path.as_ref().to_path_buf();
    tokio::task::spawn_blocking(move || compute_identity(&path)).await?
}

/// Hex form of the checksum as stored by earlier cache versions: the
/// big-endian bytes reversed before encoding.
pub(crate) fn legacy_crc_hex(checksum: u32) -> String {
    hex::encode_upper(checksum.to_le_bytes())
}
