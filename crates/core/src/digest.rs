//! Content digests for stored blobs.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Algorithm prefix used by every digest this store produces.
pub const SHA256_PREFIX: &str = "sha256:";

/// A blob content digest (`sha256:<hex>`).
///
/// Digests are global: the same bytes pushed to two repositories produce the
/// same digest and therefore share one storage object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobDigest([u8; 32]);

impl BlobDigest {
    /// Digest of blob content.
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Parse a `sha256:<hex>` digest string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let invalid = |reason: &str| crate::Error::InvalidDigest(format!("{s}: {reason}"));

        let hex = s
            .strip_prefix(SHA256_PREFIX)
            .ok_or_else(|| invalid("missing sha256: prefix"))?;
        if hex.len() != 64 {
            return Err(invalid("expected 64 hex characters"));
        }

        let mut bytes = [0u8; 32];
        for (byte, pair) in bytes.iter_mut().zip(hex.as_bytes().chunks_exact(2)) {
            let pair = std::str::from_utf8(pair).map_err(|_| invalid("not ascii"))?;
            *byte = u8::from_str_radix(pair, 16).map_err(|_| invalid("not hex"))?;
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex part of the digest.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Path of this blob in the byte store.
    ///
    /// The path is derived only from the digest, so every location stores a
    /// given blob under the same name.
    pub fn blob_path(&self) -> String {
        let hex = self.to_hex();
        format!("sha256/{}/{}", &hex[..2], hex)
    }
}

impl fmt::Debug for BlobDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobDigest({}{})", SHA256_PREFIX, &self.to_hex()[..16])
    }
}

impl fmt::Display for BlobDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SHA256_PREFIX, self.to_hex())
    }
}

impl FromStr for BlobDigest {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            BlobDigest::compute(b"hello world").to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_digest_display_and_parse() {
        let digest = BlobDigest::compute(b"layer");
        let text = digest.to_string();
        assert!(text.starts_with("sha256:"));
        assert_eq!(text.len(), 7 + 64);
        assert_eq!(text.parse::<BlobDigest>().unwrap(), digest);
    }

    #[test]
    fn test_blob_path_layout() {
        let digest = BlobDigest::compute(b"layer");
        let path = digest.blob_path();
        let parts: Vec<_> = path.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "sha256");
        assert_eq!(parts[1], &digest.to_hex()[..2]);
        assert_eq!(parts[2], digest.to_hex());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let hex = BlobDigest::compute(b"x").to_hex();
        assert!(BlobDigest::parse(&hex).is_err());
        assert!(BlobDigest::parse("sha256:zz").is_err());
        assert!(BlobDigest::parse(&format!("sha256:{}", "g".repeat(64))).is_err());
    }
}
