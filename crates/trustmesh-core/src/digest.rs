//! # Evidence Digests
//!
//! A [`ContentDigest`] fingerprints the free text an actor attaches to an
//! escrow transition: the agent's release note, a refund reason, a
//! cancellation reason. The audit trail stores the digest rather than the
//! text, so a record can be checked against the original note later.
//!
//! Digests can only be computed from [`CanonicalBytes`]; see
//! [`sha256_digest()`]. They serialize as `"sha256:<hex>"`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical::CanonicalBytes;
use crate::error::ValidationError;

/// A SHA-256 digest of canonical bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Tag prefixed to the hex form.
    pub const PREFIX: &'static str = "sha256:";

    /// Wrap a raw 32-byte SHA-256 output.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex without the tag.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse the tagged form produced by `Display`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidDigest`] for a missing tag, wrong
    /// length, or uppercase or non-hex digits.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidDigest(s.to_string());
        let hex = s.strip_prefix(Self::PREFIX).ok_or_else(invalid)?;
        if hex.len() != 64 {
            return Err(invalid());
        }
        let mut bytes = [0u8; 32];
        for (i, pair) in hex.as_bytes().chunks_exact(2).enumerate() {
            let hi = hex_value(pair[0]).ok_or_else(invalid)?;
            let lo = hex_value(pair[1]).ok_or_else(invalid)?;
            bytes[i] = (hi << 4) | lo;
        }
        Ok(Self(bytes))
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.to_hex())
    }
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentDigest({self})")
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.to_string()
    }
}

/// Hash canonical bytes with SHA-256.
pub fn sha256_digest(data: &CanonicalBytes) -> ContentDigest {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&Sha256::digest(data.as_bytes()));
    ContentDigest(bytes)
}
