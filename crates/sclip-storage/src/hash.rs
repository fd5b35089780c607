//! Content hashing for source videos.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::StorageResult;

const READ_CHUNK: usize = 1024 * 1024;

/// SHA-256 of a file's bytes, as lowercase hex.
///
/// Identical content under different names hashes identically.
pub async fn hash_video_file(path: impl AsRef<Path>) -> StorageResult<String> {
    let path = path.as_ref();
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total: u64 = 0;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }

    let digest = format!("{:x}", hasher.finalize());
    debug!(path = %path.display(), bytes = total, hash = %digest, "Hashed video file");
    Ok(digest)
}
