//! Backend row shape for order-by queries
//!
//! ```json
//! {"_rid": "...", "orderByItems": [{"item": 3}, {}], "payload": {...}}
//! ```
//!
//! An item without an `item` field is an undefined sort key, which is
//! distinct from `null`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::errors::{QueryError, QueryResult};

/// Deserialize a present field as `Some`, even when it holds `null`
pub(crate) fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByItem {
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub item: Option<Value>,
}

impl OrderByItem {
    pub fn new(item: impl Into<Value>) -> Self {
        Self {
            item: Some(item.into()),
        }
    }

    pub fn undefined() -> Self {
        Self { item: None }
    }

    /// Primitive keys can be expressed as a query filter literal
    pub fn is_primitive(&self) -> bool {
        matches!(
            self.item,
            Some(Value::Null) | Some(Value::Bool(_)) | Some(Value::Number(_)) | Some(Value::String(_))
        )
    }
}

/// One backend row of an order-by query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByRow {
    #[serde(rename = "_rid")]
    pub rid: String,
    #[serde(rename = "orderByItems")]
    pub order_by_items: Vec<OrderByItem>,
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub payload: Option<Value>,
}

impl OrderByRow {
    pub fn parse(document: Value) -> QueryResult<Self> {
        serde_json::from_value(document)
            .map_err(|e| QueryError::internal(format!("malformed order-by row: {}", e)))
    }

    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
