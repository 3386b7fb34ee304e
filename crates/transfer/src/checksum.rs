use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::TransferError;

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file and returns the hex-encoded digest.
///
/// Intended for the per-file hashing task that runs alongside the
/// partition uploads; the result feeds
/// [`UploadFileNode::set_file_hash`](crate::UploadFileNode::set_file_hash).
pub async fn calculate_file_checksum(path: &Path) -> Result<String, TransferError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
