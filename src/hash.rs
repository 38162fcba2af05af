//! Streaming content digests

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha512};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Read buffer size used while hashing
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Digest algorithm shared by local hashing and the remote lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha1,
    Sha512,
}

impl HashAlgorithm {
    /// Name used on the wire and as the key of remote hash maps
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase hex digest of a file, read in [`CHUNK_SIZE`] chunks
pub fn digest_file(path: &Path, algorithm: HashAlgorithm) -> Result<String, SyncError> {
    let file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    digest_reader(file, algorithm).map_err(|e| SyncError::io(path, e))
}

pub fn digest_reader<R: Read>(reader: R, algorithm: HashAlgorithm) -> std::io::Result<String> {
    match algorithm {
        HashAlgorithm::Sha1 => stream::<Sha1, R>(reader),
        HashAlgorithm::Sha512 => stream::<Sha512, R>(reader),
    }
}

fn stream<D: Digest, R: Read>(mut reader: R) -> std::io::Result<String> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
