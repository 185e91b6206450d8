//! Hash-based id generation for graph nodes.
//!
//! Issues and timeline items get short, collision-resistant ids of the form
//! `{prefix}-{hash}` (e.g. `issue-a3f8`). The hash is SHA-256 over the node's
//! content, the current timestamp and a nonce, base36-encoded.
//!
//! # Adaptive length
//!
//! The hash part grows with the number of nodes the generator has seen:
//!
//! - up to 500 nodes: 4 characters
//! - up to 1,500 nodes: 5 characters
//! - up to 50,000 nodes: 6 characters
//! - beyond: 8 characters
//!
//! # Example
//!
//! ```
//! use trellis::id_generation::IdGenerator;
//!
//! let mut generator = IdGenerator::new("issue");
//! let id = generator.generate(&["Fix bug", "crash on start"]).unwrap();
//! assert!(id.starts_with("issue-"));
//! ```

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

const BASE36_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_NONCE: u32 = 100;
const MAX_LENGTH: usize = 12;

/// Errors that can occur during ID generation
#[derive(Debug, Error)]
pub enum IdGenerationError {
    /// Unable to generate a unique ID after exhausting all nonces and length increases
    #[error("Unable to generate unique ID after {attempts} attempts")]
    CollisionExhausted {
        /// Nonces tried at the final length
        attempts: u32,
    },

    /// Invalid length parameter
    #[error("Length must be greater than 0")]
    InvalidLength,
}

/// Hash-based ID generator with collision detection.
///
/// Keeps every id it issued or was told about; memory grows with the node
/// count (roughly 1KB per 1000 ids).
#[derive(Debug)]
pub struct IdGenerator {
    prefix: String,
    existing_ids: HashSet<String>,
}

impl IdGenerator {
    /// Create a new ID generator for the given prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            existing_ids: HashSet::new(),
        }
    }

    /// Register an existing ID to prevent collisions
    pub fn register_id(&mut self, id: impl Into<String>) {
        self.existing_ids.insert(id.into());
    }

    /// The prefix prepended to every generated id.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Generate a new unique ID from the node's content parts.
    ///
    /// # Errors
    ///
    /// Returns an error if every nonce collides at every length up to the maximum.
    pub fn generate(&mut self, parts: &[&str]) -> Result<String, IdGenerationError> {
        let mut length = self.adaptive_length();

        while length <= MAX_LENGTH {
            for nonce in 0..MAX_NONCE {
                let id = self.hash_id(parts, nonce, length)?;
                if self.existing_ids.insert(id.clone()) {
                    if nonce > 0 {
                        debug!(nonce, length, "Generated unique ID after collision retries");
                    }
                    return Ok(id);
                }
            }

            warn!(
                length,
                max_nonce = MAX_NONCE,
                "All nonces exhausted, increasing ID length"
            );
            length += 1;
        }

        Err(IdGenerationError::CollisionExhausted {
            attempts: MAX_NONCE,
        })
    }

    fn hash_id(&self, parts: &[&str], nonce: u32, length: usize) -> Result<String, IdGenerationError> {
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();

        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update(b"|");
        }
        hasher.update(timestamp.to_le_bytes());
        hasher.update(nonce.to_le_bytes());
        let hash_bytes = hasher.finalize();

        let hash_str = encode_base36(&hash_bytes[..8], length)?;
        Ok(format!("{}-{}", self.prefix, hash_str))
    }

    fn adaptive_length(&self) -> usize {
        match self.existing_ids.len() {
            0..=500 => 4,
            501..=1500 => 5,
            1501..=50_000 => 6,
            _ => 8,
        }
    }
}

/// Encode bytes as base36 string.
///
/// Only the first 8 bytes contribute; wrapping keeps the fold deterministic.
fn encode_base36(bytes: &[u8], length: usize) -> Result<String, IdGenerationError> {
    if length == 0 {
        return Err(IdGenerationError::InvalidLength);
    }

    let mut num: u64 = 0;
    for &byte in bytes {
        num = num.wrapping_shl(8).wrapping_add(u64::from(byte));
    }

    let mut result = Vec::with_capacity(length);
    let mut n = num;
    while result.len() < length {
        let remainder = usize::try_from(n % 36).unwrap_or_default();
        result.push(char::from(BASE36_CHARS[remainder]));
        n /= 36;
    }

    result.reverse();
    Ok(result.into_iter().collect())
}

/// Check that `id` has the form `{prefix}-{base36 hash}`.
pub fn validate_id(id: &str, prefix: &str) -> bool {
    let Some(hash) = id
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('-'))
    else {
        return false;
    };

    (4..=MAX_LENGTH).contains(&hash.len())
        && hash
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base36_encoding() {
        let result = encode_base36(&[0x12, 0x34, 0x56, 0x78], 4).unwrap();
        assert_eq!(result.len(), 4);
        assert!(result.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(matches!(
            encode_base36(&[1], 0),
            Err(IdGenerationError::InvalidLength)
        ));
    }

    #[test]
    fn test_adaptive_length_grows_with_population() {
        let mut generator = IdGenerator::new("item");
        assert_eq!(generator.adaptive_length(), 4);

        for i in 0..600 {
            generator.register_id(format!("seed-{i}"));
        }
        assert_eq!(generator.adaptive_length(), 5);
    }

    #[test]
    fn test_id_generation() {
        let mut generator = IdGenerator::new("issue");
        let id = generator.generate(&["Test Title", "Test Body"]).unwrap();

        assert!(id.starts_with("issue-"));
        assert!(validate_id(&id, "issue"));
    }

    #[test]
    fn test_same_content_gets_unique_ids() {
        let mut generator = IdGenerator::new("item");
        let id1 = generator.generate(&["same"]).unwrap();
        let id2 = generator.generate(&["same"]).unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_id_validation() {
        assert!(validate_id("issue-a3f8", "issue"));
        assert!(validate_id("issue-abc123", "issue"));

        assert!(!validate_id("invalid", "issue"));
        assert!(!validate_id("issue-", "issue"));
        assert!(!validate_id("issue-ab", "issue"));
        assert!(!validate_id("issue-A3F8", "issue"));
        assert!(!validate_id("item-a3f8", "issue"));
    }

    #[test]
    fn test_register_existing_ids() {
        let mut generator = IdGenerator::new("issue");
        generator.register_id("issue-a3f8");
        generator.register_id("issue-b4g9");

        let new_id = generator.generate(&["New"]).unwrap();
        assert_ne!(new_id, "issue-a3f8");
        assert_ne!(new_id, "issue-b4g9");
    }
}
