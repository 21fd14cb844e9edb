//! Feed ranges over the effective-partition-key space
//!
//! Keys are upper-case hex strings compared lexicographically. The empty
//! string is the minimum key and `"FF"` is the exclusive maximum.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Minimum effective partition key (inclusive)
pub const MIN_EPK: &str = "";

/// Maximum effective partition key (exclusive)
pub const MAX_EPK: &str = "FF";

/// Half-open key range `[min, max)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedRange {
    pub min: String,
    pub max: String,
}

impl FeedRange {
    pub fn new(min: impl Into<String>, max: impl Into<String>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// The whole keyspace
    pub fn full() -> Self {
        Self::new(MIN_EPK, MAX_EPK)
    }

    pub fn is_empty(&self) -> bool {
        self.min >= self.max
    }

    /// True when `key` falls inside this range
    pub fn contains_key(&self, key: &str) -> bool {
        self.min.as_str() <= key && key < self.max.as_str()
    }

    /// True when `other` lies entirely inside this range
    pub fn contains(&self, other: &FeedRange) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    pub fn overlaps(&self, other: &FeedRange) -> bool {
        self.min < other.max && other.min < self.max
    }
}

impl fmt::Display for FeedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_range_contains_everything() {
        let full = FeedRange::full();
        assert!(full.contains_key(""));
        assert!(full.contains_key("7FFFFFFF"));
        assert!(full.contains_key("FEFFFFFF"));
        assert!(!full.contains_key("FF"));
        assert!(full.contains(&FeedRange::new("40", "80")));
    }

    #[test]
    fn test_overlap_and_containment() {
        let left = FeedRange::new("", "80");
        let right = FeedRange::new("80", "FF");
        assert!(!left.overlaps(&right));
        assert!(left.overlaps(&FeedRange::new("70", "90")));
        assert!(!left.contains(&FeedRange::new("70", "90")));
        assert!(left < right);
        assert!(FeedRange::new("80", "80").is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(FeedRange::new("", "80").to_string(), "[, 80)");
    }
}
