//! Query text plus parameters, as sent to one range

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder in a rewritten order-by query where the resume filter goes
pub const ORDER_BY_FILTER_PLACEHOLDER: &str = "{documentdb-formattableorderbyquery-filter}";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlParameter {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlQuerySpec {
    #[serde(rename = "query")]
    pub query_text: String,
    #[serde(default)]
    pub parameters: Vec<SqlParameter>,
}

impl SqlQuerySpec {
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push(SqlParameter {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn has_order_by_filter(&self) -> bool {
        self.query_text.contains(ORDER_BY_FILTER_PLACEHOLDER)
    }

    /// Substitute the resume filter into the query text
    pub fn with_order_by_filter(&self, filter: &str) -> Self {
        Self {
            query_text: self.query_text.replace(ORDER_BY_FILTER_PLACEHOLDER, filter),
            parameters: self.parameters.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_filter_substitution() {
        let spec = SqlQuerySpec::new(format!(
            "SELECT * FROM c WHERE {} ORDER BY c.x",
            ORDER_BY_FILTER_PLACEHOLDER
        ))
        .with_parameter("@p", 1);
        assert!(spec.has_order_by_filter());

        let resumed = spec.with_order_by_filter("c.x > 5");
        assert_eq!(resumed.query_text, "SELECT * FROM c WHERE c.x > 5 ORDER BY c.x");
        assert_eq!(resumed.parameters.len(), 1);
        assert!(!resumed.has_order_by_filter());
    }
}
