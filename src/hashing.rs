use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Stream-hash a file without holding its full contents in memory. Used for
/// arbitrarily large source images.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|_| Error::HashUnavailable(path.to_path_buf()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; STREAM_CHUNK_SIZE];
    loop {
        let read = reader
            .read(&mut buf)
            .map_err(|_| Error::HashUnavailable(path.to_path_buf()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash an already-in-memory buffer (the Compression Worker Pool reuses a buffer it already
/// read rather than hashing the file twice).
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
