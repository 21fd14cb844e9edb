//! Resource ids (`_rid`)
//!
//! A rid is base64 of a little-endian binary layout:
//! - bytes 0..4: database id
//! - bytes 4..8: collection id
//! - bytes 8..16: document id
//!
//! `/` is written as `-` so rids are path safe.

use std::cmp::Ordering;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Parsed resource id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub database: u32,
    pub collection: u32,
    pub document: u64,
}

impl ResourceId {
    pub fn new(database: u32, collection: u32, document: u64) -> Self {
        Self {
            database,
            collection,
            document,
        }
    }

    /// Parse a textual rid; `None` when it is not a document rid
    pub fn parse(rid: &str) -> Option<Self> {
        let bytes = STANDARD.decode(rid.replace('-', "/")).ok()?;
        if bytes.len() < 16 {
            return None;
        }
        let database = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let collection = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
        let document = u64::from_le_bytes(bytes[8..16].try_into().ok()?);
        Some(Self::new(database, collection, document))
    }

    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&self.database.to_le_bytes());
        bytes.extend_from_slice(&self.collection.to_le_bytes());
        bytes.extend_from_slice(&self.document.to_le_bytes());
        STANDARD.encode(bytes).replace('/', "-")
    }
}

/// Total order over rids: by document id, falling back to the raw text
pub fn compare_rids(left: &str, right: &str) -> Ordering {
    match (ResourceId::parse(left), ResourceId::parse(right)) {
        (Some(l), Some(r)) => l
            .document
            .cmp(&r.document)
            .then_with(|| left.cmp(right)),
        _ => left.cmp(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_parse() {
        let rid = ResourceId::new(7, 9, 1_000_000);
        assert_eq!(ResourceId::parse(&rid.encode()), Some(rid));
    }

    #[test]
    fn test_document_order_not_text_order() {
        // Little-endian layout makes text order disagree with numeric order.
        let small = ResourceId::new(1, 1, 255).encode();
        let large = ResourceId::new(1, 1, 256).encode();
        assert_eq!(compare_rids(&small, &large), Ordering::Less);
        assert_eq!(compare_rids(&large, &small), Ordering::Greater);
        assert_eq!(compare_rids(&small, &small), Ordering::Equal);
    }

    #[test]
    fn test_unparseable_falls_back_to_text() {
        assert_eq!(compare_rids("abc", "abd"), Ordering::Less);
        assert!(ResourceId::parse("abc").is_none());
    }
}
