//! Content fingerprints.
//!
//! Every hash in the index (file content, chunk text, chunk id, provider
//! key) is a lowercase SHA-256 hex digest, so it is always 64 characters.

use sha2::{Digest, Sha256};

use crate::models::MemorySource;

/// SHA-256 of `text`, as 64 lowercase hex characters.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable identity of an indexed chunk.
///
/// The same chunk content at the same location embedded by the same model
/// maps to the same id across runs.
pub fn chunk_id(
    source: MemorySource,
    path: &str,
    start_line: usize,
    end_line: usize,
    hash: &str,
    model: &str,
) -> String {
    hash_text(&format!(
        "{}:{}:{}:{}:{}:{}",
        source.as_str(),
        path,
        start_line,
        end_line,
        hash,
        model
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            hash_text("hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_deterministic_and_fixed_length() {
        for s in ["", "a", "a much longer piece of markdown\n# heading\n"] {
            assert_eq!(hash_text(s), hash_text(s));
            assert_eq!(hash_text(s).len(), 64);
        }
    }

    #[test]
    fn test_distinct_inputs() {
        assert_ne!(hash_text("alpha"), hash_text("alpha "));
        assert_ne!(hash_text("MEMORY.md"), hash_text("memory.md"));
    }

    #[test]
    fn test_chunk_id_depends_on_model() {
        let h = hash_text("body");
        let a = chunk_id(MemorySource::Memory, "MEMORY.md", 1, 4, &h, "m1");
        let b = chunk_id(MemorySource::Memory, "MEMORY.md", 1, 4, &h, "m2");
        assert_ne!(a, b);
        assert_eq!(a, chunk_id(MemorySource::Memory, "MEMORY.md", 1, 4, &h, "m1"));
    }
}
