//! Canonical fingerprints for reproducibility audits.
//!
//! Engine parameters and sampled rupture sets are fingerprinted so two runs
//! can be compared cheaply: identical inputs and seeds must produce
//! identical fingerprints, bit for bit.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: struct fields serialize in declaration order
//! - Stable Vec order: vectors serialize in index order
//! - No HashMap in fingerprinted data: use BTreeMap for maps

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

use crate::types::Rupture;

/// Serialize a value to canonical bytes for fingerprinting.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("canonical serialization failed")
}

/// 64-bit canonical fingerprint of a serializable value.
pub fn fingerprint64<T: Serialize>(value: &T) -> u64 {
    xxh64(&to_canonical_bytes(value), 0)
}

/// Canonical fingerprint rendered as a fixed-width hex string.
pub fn fingerprint_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", fingerprint64(value))
}

/// Fingerprint of a sampled rupture set.
///
/// Ruptures are fingerprinted in serial order so the value is independent of
/// the sampling tasks' completion order.
pub fn rupture_set_fingerprint(ruptures: &[Rupture]) -> String {
    let mut sorted: Vec<&Rupture> = ruptures.iter().collect();
    sorted.sort_by_key(|r| r.serial);
    fingerprint_hex(&sorted)
}
