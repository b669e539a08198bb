//! Half-open byte-string key ranges.
//!
//! A range is `[start_key, end_key)` where an empty `end_key` means the range
//! extends to the end of the key space. An empty `start_key` is simply the
//! smallest key, so `KeyRange::full()` covers everything.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A half-open interval of raw keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    /// Inclusive start. Empty means the beginning of the key space.
    pub start_key: Vec<u8>,
    /// Exclusive end. Empty means unbounded.
    pub end_key: Vec<u8>,
}

impl KeyRange {
    pub fn new(start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
        }
    }

    /// The range covering the entire key space.
    pub fn full() -> Self {
        Self::default()
    }

    pub fn is_full(&self) -> bool {
        self.start_key.is_empty() && self.end_key.is_empty()
    }

    pub fn is_end_unbounded(&self) -> bool {
        self.end_key.is_empty()
    }

    /// Whether `key` falls inside `[start_key, end_key)`.
    pub fn contains(&self, key: &[u8]) -> bool {
        compare_bytes_ext(&self.start_key, false, key, false) != Ordering::Greater
            && compare_bytes_ext(key, false, &self.end_key, true) == Ordering::Less
    }

    /// Whether this range intersects `other`.
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        overlaps(self, other)
    }

    /// Split this range at `key` into `[start, key)` and `[key, end)`.
    ///
    /// The key must lie strictly inside the range: splitting at the start
    /// would produce an empty left half.
    pub fn split(&self, key: &[u8]) -> Result<(KeyRange, KeyRange), KeyRangeError> {
        if key <= self.start_key.as_slice() || !self.contains(key) {
            return Err(KeyRangeError::InvalidSplitKey {
                key: hex(key),
                range: self.to_string(),
            });
        }
        let left = KeyRange::new(self.start_key.clone(), key);
        let right = KeyRange::new(key, self.end_key.clone());
        debug_assert_eq!(left.end_key, right.start_key);
        Ok((left, right))
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", hex(&self.start_key), hex(&self.end_key))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyRangeError {
    #[error("split key {key} is not strictly inside {range}")]
    InvalidSplitKey { key: String, range: String },
}

/// Returns true iff the half-open ranges `a` and `b` intersect, treating an
/// empty end key on either side as unbounded.
pub fn overlaps(a: &KeyRange, b: &KeyRange) -> bool {
    if b.end_key.is_empty() {
        return a.end_key.is_empty() || a.end_key > b.start_key;
    }
    if a.end_key.is_empty() {
        return b.end_key > a.start_key;
    }
    a.start_key < b.end_key && b.start_key < a.end_key
}

/// Byte-wise comparison where an empty operand may stand for positive
/// infinity (the unbounded end of a range).
pub fn compare_bytes_ext(a: &[u8], a_empty_as_inf: bool, b: &[u8], b_empty_as_inf: bool) -> Ordering {
    let a_inf = a.is_empty() && a_empty_as_inf;
    let b_inf = b.is_empty() && b_empty_as_inf;
    match (a_inf, b_inf) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.cmp(b),
    }
}

/// Lowercase hex rendering used in logs and dumps.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
