//! Epoch identifiers.
//!
//! An epoch names which manifest file is authoritative from a given engine
//! file number onwards. New epochs are minted from a random unique id, so two
//! writers rolling concurrently end up with distinct epochs.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh32::xxh32;

/// Length of a minted epoch id in hex characters.
pub const EPOCH_ID_LEN: usize = 16;

/// Opaque epoch identifier. The empty id marks pre-epoch (legacy) databases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct EpochId(String);

impl EpochId {
    /// The empty (legacy) epoch.
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Wraps an id read from a file name or a persisted document.
    pub fn from_raw(raw: &str) -> Self {
        Self(raw.to_string())
    }

    /// True for the legacy empty epoch.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this id has the shape of a minted epoch (16 lowercase hex digits).
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == EPOCH_ID_LEN
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

impl std::fmt::Display for EpochId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives an epoch id from a unique id string.
///
/// The string is split in half by bytes; each half is hashed with XXH32
/// (seed 0), the first half fills the low 32 bits and the second the high
/// 32 bits. The value is rendered as 16 zero-padded hex characters.
pub fn mint_epoch(unique_id: &str) -> EpochId {
    let bytes = unique_id.as_bytes();
    let (low, high) = bytes.split_at(bytes.len() / 2);
    let value = u64::from(xxh32(low, 0)) | (u64::from(xxh32(high, 0)) << 32);
    EpochId(format!("{:016x}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_epoch_shape() {
        let epoch = mint_epoch("3f2b8c1e-5d4a-4e7b-9c10-2a6f8e0d1b33");
        assert_eq!(epoch.as_str().len(), EPOCH_ID_LEN);
        assert!(epoch.is_well_formed());
    }

    #[test]
    fn test_mint_epoch_deterministic() {
        let a = mint_epoch("unique-id-0001");
        let b = mint_epoch("unique-id-0001");
        assert_eq!(a, b);
    }

    #[test]
    fn test_mint_epoch_distinct_inputs() {
        let a = mint_epoch("unique-id-0001");
        let b = mint_epoch("unique-id-0002");
        assert_ne!(a, b);
    }

    #[test]
    fn test_mint_epoch_halves() {
        let id = "abcdefgh";
        let expected = u64::from(xxh32(b"abcd", 0)) | (u64::from(xxh32(b"efgh", 0)) << 32);
        assert_eq!(mint_epoch(id).as_str(), format!("{:016x}", expected));
    }

    #[test]
    fn test_mint_epoch_empty_input() {
        let epoch = mint_epoch("");
        assert!(epoch.is_well_formed());
        assert!(!epoch.is_empty());
    }

    #[test]
    fn test_empty_epoch() {
        let epoch = EpochId::empty();
        assert!(epoch.is_empty());
        assert!(!epoch.is_well_formed());
        assert_eq!(epoch.to_string(), "");
    }
}
