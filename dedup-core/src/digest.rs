use sha2::{Digest, Sha256};
use std::fmt;

pub const DIGEST_HEX_LEN: usize = 64;

/// SHA-256 identity of a chunk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkDigest([u8; 32]);

impl ChunkDigest {
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses the canonical lowercase 64-char form; anything else is rejected.
    pub fn from_hex(s: &str) -> Option<Self> {
        if !is_digest_hex(s) {
            return None;
        }
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).ok()?;
        Some(Self(out))
    }
}

impl fmt::Display for ChunkDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ChunkDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkDigest({})", self.to_hex())
    }
}

pub fn is_digest_hex(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_of_hello_world() {
        let d = ChunkDigest::of(b"hello world");
        assert_eq!(d.to_hex(), "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
    }

    #[test]
    fn hex_parse_is_strict() {
        let d = ChunkDigest::of(b"x");
        assert_eq!(ChunkDigest::from_hex(&d.to_hex()), Some(d));
        assert!(ChunkDigest::from_hex(&d.to_hex().to_uppercase()).is_none());
        assert!(ChunkDigest::from_hex("abcd").is_none());
    }
}
