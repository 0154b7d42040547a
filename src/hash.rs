// =============================================================================
// hash.rs — THE SIGNATURE FORGE
// =============================================================================
//
// Every fingerprint gets boiled down to a SHA-256 digest. The digest is used
// twice: as the signature of a full (IP, user agent, accept-language) triple,
// and as a stand-in for a raw user agent string, which is far too long and
// too noisy to index directly. Nobody wants a secondary index keyed on
// 300-character Chrome version soup.
//
// Parts are fed into the digest back to back, in order. Hashing [A, B] and
// [B, A] gives different signatures unless A == B.
//
// The digest writer cannot fail. We check anyway, and if it ever does, the
// signature is thrown away and an error event is emitted. A half-written
// digest looks exactly like a valid one, which is worse than no digest.
// =============================================================================

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;
use tracing::error;

/// Length of a digest in bytes.
pub const HASH_LEN: usize = 32;

/// A SHA-256 digest of an ordered sequence of strings.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Digest the given parts in order.
    ///
    /// Returns `None` only if the digest writer rejected input, which the
    /// SHA-256 implementation never does. That path is reported as an
    /// `error` event on the `fingerprints::hash` target.
    pub fn digest<I, S>(parts: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hasher = Sha256::new();
        if !feed(&mut hasher, parts) {
            return None;
        }

        Some(Self(hasher.finalize().into()))
    }

    /// Lowercase hex encoding, 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

/// Hex encoded digest of the given parts, the form used for index keys and
/// signatures.
///
/// An empty string stands for "no signature": it is never a valid digest,
/// it is never indexed, and the duplicate scanner never groups on it.
pub fn hash_hex<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Hash::digest(parts).map(|h| h.to_hex()).unwrap_or_default()
}

/// Write every part into `sink`. Returns false (after reporting) on the
/// first rejected write.
fn feed<W, I, S>(sink: &mut W, parts: I) -> bool
where
    W: Write,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for part in parts {
        let part = part.as_ref();
        if let Err(err) = sink.write_all(part.as_bytes()) {
            error!(
                target: "fingerprints::hash",
                value = part,
                error = %err,
                "Digest writer rejected input — signature discarded, please report this"
            );
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    const UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/87.0.4280.141 Safari/537.36";

    /// A writer that refuses everything. The real digest never does this.
    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "writer is broken"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_known_sha256_vector() {
        // Parts are concatenated, so a/b/c hashes like "abc"
        assert_eq!(
            hash_hex(["a", "b", "c"]),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_is_deterministic() {
        let parts = ["64.233.191.255", UA, "en-US,en;q=0.9"];
        assert_eq!(Hash::digest(parts), Hash::digest(parts));
        assert_eq!(hash_hex(parts).len(), HASH_LEN * 2);
    }

    #[test]
    fn test_digest_is_order_sensitive() {
        let forward = hash_hex(["64.233.191.255", UA, "en-US"]);
        let backward = hash_hex(["en-US", UA, "64.233.191.255"]);
        assert_ne!(forward, backward);

        // Equal parts in any order are, unsurprisingly, equal
        assert_eq!(hash_hex(["x", "x", "x"]), hash_hex(["x", "x", "x"]));
    }

    #[test]
    fn test_empty_input_still_hashes() {
        let empty: [&str; 0] = [];
        assert_eq!(
            hash_hex(empty),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_display_matches_hex() {
        let h = Hash::digest(["abc"]).expect("sha256 never rejects input");
        assert_eq!(h.to_string(), h.to_hex());
        assert_eq!(h.to_hex().len(), HASH_LEN * 2);
    }

    #[test]
    fn test_rejected_write_is_reported_not_propagated() {
        // Unreachable with Sha256; this proves the fallback does not hand
        // back a partial result.
        assert!(!feed(&mut BrokenWriter, ["64.233.191.255", UA]));
        assert!(feed(&mut Vec::<u8>::new(), ["64.233.191.255", UA]));
    }
}
