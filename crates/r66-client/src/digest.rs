//! MD5 content digests
//!
//! R66 uses MD5 for its end-to-end file check, so the spooled daemon computes
//! the same digest before dispatching when MD5 mode is requested.

use md5::{Digest, Md5};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Raw MD5 digest
pub type Md5Digest = [u8; 16];

/// Compute the MD5 digest of a file, reading `block_size` bytes at a time.
///
/// This is blocking I/O; async callers should run it on a blocking thread.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn file_digest(path: &Path, block_size: usize) -> std::io::Result<Md5Digest> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; block_size.max(1)];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().into())
}

/// Digest of an in-memory buffer.
pub fn bytes_digest(data: &[u8]) -> Md5Digest {
    Md5::digest(data).into()
}

/// Lowercase hex rendering of a digest.
pub fn to_hex(digest: &Md5Digest) -> String {
    hex::encode(digest)
}
