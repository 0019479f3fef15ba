//! Hashing helpers shared by fingerprints, dedupe hashes and cache keys

use sha2::{Digest, Sha256};

/// Unit separator used between hashed parts so that ("ab", "c") and
/// ("a", "bc") never collide.
const PART_SEPARATOR: u8 = 0x1f;

/// SHA-256 over the given parts, hex encoded.
pub fn sha256_parts<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
        hasher.update([PART_SEPARATOR]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        let a = sha256_parts(["tenant", "file.csv", "3"]);
        let b = sha256_parts(["tenant", "file.csv", "3"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_part_boundaries_matter() {
        assert_ne!(sha256_parts(["ab", "c"]), sha256_parts(["a", "bc"]));
    }
}
