use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

/// A `sha256:<hex>` checksum, canonical form used throughout the on-disk
/// and remote JSON schemas (§6). Kept as a newtype around the prefixed
/// string rather than raw bytes so it round-trips through `serde_json`
/// without a custom visitor, the way `peoci::spec::Digest` instead chose to
/// store raw bytes for `bincode` compactness -- we don't have that
/// constraint here since indexes are tiny JSON, not a disk cache keyed by
/// digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("checksum missing 'sha256:' prefix")]
    MissingPrefix,
    #[error("checksum has wrong hex length")]
    BadLength,
    #[error("checksum is not valid lowercase hex")]
    NotHex,
}

impl Checksum {
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, bytes: impl AsRef<[u8]>) -> bool {
        *self == Checksum::of(bytes)
    }
}

impl FromStr for Checksum {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix("sha256:").ok_or(ChecksumError::MissingPrefix)?;
        if hex_part.len() != 64 {
            return Err(ChecksumError::BadLength);
        }
        if !hex_part.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(ChecksumError::NotHex);
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Checksum {
    type Error = ChecksumError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> String {
        c.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_round_trips_through_string() {
        let c = Checksum::of(b"hello world");
        let s: String = c.clone().into();
        let back: Checksum = s.parse().unwrap();
        assert_eq!(c, back);
    }

    #[test]
    fn matches_detects_tamper() {
        let c = Checksum::of(b"session body bytes");
        assert!(c.matches(b"session body bytes"));
        assert!(!c.matches(b"session body byte5"));
    }

    #[test]
    fn rejects_bad_prefix_and_length() {
        assert!("md5:abcd".parse::<Checksum>().is_err());
        assert!("sha256:abcd".parse::<Checksum>().is_err());
        assert!("sha256:ABCD0000000000000000000000000000000000000000000000000000000000"
            .parse::<Checksum>()
            .is_err());
    }
}
