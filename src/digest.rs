//! Content digests
//!
//! Every identity in the solver (vertex digests, cache keys, content
//! checksums) is a SHA256 digest rendered as `sha256:<hex>`.

use crate::error::KilnResult;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

const ALGORITHM: &str = "sha256";

/// A content digest in `algorithm:hex` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Digest of a byte sequence
    pub fn from_bytes(data: impl AsRef<[u8]>) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(data))
    }

    /// Digest of the canonical JSON encoding of a record.
    ///
    /// Records hashed this way must only contain ordered collections
    /// (`Vec`, `BTreeMap`) so the encoding is stable across runs.
    pub fn from_record<T: Serialize + ?Sized>(record: &T) -> KilnResult<Self> {
        let data = serde_json::to_vec(record)?;
        Ok(Self::from_bytes(data))
    }

    /// Finish a hasher that was fed incrementally
    pub fn from_hasher(hasher: Sha256) -> Self {
        Self(format!("{}:{}", ALGORITHM, hex::encode(hasher.finalize())))
    }

    /// The hex-encoded part of the digest
    pub fn hex(&self) -> &str {
        self.0
            .split_once(':')
            .map(|(_, hex)| hex)
            .unwrap_or(&self.0)
    }

    /// First 12 hex characters, for display
    pub fn short(&self) -> &str {
        let hex = self.hex();
        &hex[..hex.len().min(12)]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
