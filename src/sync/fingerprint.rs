//! Snapshot fingerprints
//!
//! SHA-256 over the JSON encoding of the rows, in their literal order.
//! Reordering rows or cells, or reshaping the grid, changes the digest.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::types::Snapshot;

/// Fixed-length content digest of a snapshot
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Compute the fingerprint of a snapshot
    pub fn of(snapshot: &Snapshot) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical_bytes(snapshot));
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Self(digest)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Byte encoding hashed by [`Fingerprint::of`]
///
/// JSON arrays keep element order and nesting, so `[[1,2],[3,4]]` and
/// `[[1,2,3,4]]` encode differently. Object cells (not produced by tabular
/// APIs, but representable) are encoded with sorted keys.
fn canonical_bytes(snapshot: &Snapshot) -> Vec<u8> {
    // Serializing Vec<Vec<Value>> cannot fail
    serde_json::to_vec(snapshot.rows()).unwrap_or_default()
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..12])
    }
}

/// Error parsing a stored fingerprint
#[derive(Debug, thiserror::Error)]
#[error("invalid fingerprint: {0}")]
pub struct InvalidFingerprint(String);

impl FromStr for Fingerprint {
    type Err = InvalidFingerprint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| InvalidFingerprint(e.to_string()))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| InvalidFingerprint(format!("expected 32 bytes, got {}", b.len())))?;
        Ok(Self(digest))
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.to_hex()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = InvalidFingerprint;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
