use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::hash::{distinct_hash, DistinctHash};
use crate::errors::{QueryError, QueryResult};
use crate::query::DistinctQueryType;

/// Rows seen so far
#[derive(Debug, Clone, PartialEq)]
pub enum DistinctMap {
    /// Sorted input: duplicates are adjacent, only the last row matters
    Ordered { last: Option<DistinctHash> },
    Unordered { seen: HashSet<DistinctHash> },
}

/// Persisted form. Unordered hashes are packed as sorted 16-byte big-endian
/// digests in standard base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum DistinctMapToken {
    #[serde(rename_all = "camelCase")]
    Ordered {
        #[serde(default)]
        last_hash: Option<DistinctHash>,
    },
    Unordered { hashes: String },
}

impl DistinctMap {
    pub fn new(distinct_type: DistinctQueryType) -> QueryResult<Self> {
        match distinct_type {
            DistinctQueryType::Ordered => Ok(DistinctMap::Ordered { last: None }),
            DistinctQueryType::Unordered => Ok(DistinctMap::Unordered {
                seen: HashSet::new(),
            }),
            DistinctQueryType::None => Err(QueryError::invalid_argument(
                "distinct map needs an ordered or unordered distinct query",
            )),
        }
    }

    pub fn from_token(distinct_type: DistinctQueryType, token: &DistinctMapToken) -> QueryResult<Self> {
        match (distinct_type, token) {
            (DistinctQueryType::Ordered, DistinctMapToken::Ordered { last_hash }) => {
                Ok(DistinctMap::Ordered { last: *last_hash })
            }
            (DistinctQueryType::Unordered, DistinctMapToken::Unordered { hashes }) => {
                let bytes = STANDARD
                    .decode(hashes)
                    .map_err(|e| QueryError::malformed(format!("distinct hashes: {}", e)))?;
                if bytes.len() % 16 != 0 {
                    return Err(QueryError::malformed(format!(
                        "distinct hashes: {} bytes is not a whole number of digests",
                        bytes.len()
                    )));
                }
                let seen = bytes
                    .chunks_exact(16)
                    .map(|chunk| {
                        let mut digest = [0u8; 16];
                        digest.copy_from_slice(chunk);
                        DistinctHash::from_bytes(digest)
                    })
                    .collect();
                Ok(DistinctMap::Unordered { seen })
            }
            (expected, _) => Err(QueryError::malformed(format!(
                "distinct continuation does not match {:?} distinct",
                expected
            ))),
        }
    }

    /// Record `row`; true when it was not seen before
    pub fn add(&mut self, row: &Value) -> bool {
        let hash = distinct_hash(row);
        match self {
            DistinctMap::Ordered { last } => {
                if *last == Some(hash) {
                    false
                } else {
                    *last = Some(hash);
                    true
                }
            }
            DistinctMap::Unordered { seen } => seen.insert(hash),
        }
    }

    pub fn to_token(&self) -> DistinctMapToken {
        match self {
            DistinctMap::Ordered { last } => DistinctMapToken::Ordered { last_hash: *last },
            DistinctMap::Unordered { seen } => {
                let mut hashes: Vec<&DistinctHash> = seen.iter().collect();
                hashes.sort();
                let bytes: Vec<u8> = hashes.into_iter().flat_map(|hash| hash.to_bytes()).collect();
                DistinctMapToken::Unordered {
                    hashes: STANDARD.encode(bytes),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ordered_only_suppresses_adjacent() {
        let mut map = DistinctMap::new(DistinctQueryType::Ordered).unwrap();
        let kept: Vec<bool> = [1, 1, 2, 1].iter().map(|v| map.add(&json!(v))).collect();
        assert_eq!(kept, vec![true, false, true, true]);
    }

    #[test]
    fn test_unordered_token_restores_seen_set() {
        let mut map = DistinctMap::new(DistinctQueryType::Unordered).unwrap();
        map.add(&json!({"a": 1}));
        map.add(&json!("b"));
        let token = map.to_token();
        let mut restored = DistinctMap::from_token(DistinctQueryType::Unordered, &token).unwrap();
        assert_eq!(restored, map);
        assert!(!restored.add(&json!({"a": 1.0})));
        assert!(restored.add(&json!("c")));
    }

    #[test]
    fn test_mode_mismatch_rejected() {
        let token = DistinctMapToken::Ordered { last_hash: None };
        assert!(matches!(
            DistinctMap::from_token(DistinctQueryType::Unordered, &token),
            Err(QueryError::MalformedContinuationToken(_))
        ));
        let truncated = DistinctMapToken::Unordered {
            hashes: STANDARD.encode([0u8; 7]),
        };
        assert!(DistinctMap::from_token(DistinctQueryType::Unordered, &truncated).is_err());
    }
}
