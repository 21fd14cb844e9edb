//! Query pages

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::state::QueryState;
use crate::errors::QueryError;

/// Per-page execution hints returned by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryExecutionInfo {
    /// Rows with tied sort keys arrive in descending rid order
    #[serde(default)]
    pub reverse_rid_enabled: bool,
    #[serde(default)]
    pub reverse_index_scan: bool,
}

/// One page of results
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    pub documents: Vec<Value>,
    pub request_charge: f64,
    pub activity_id: String,
    pub response_length_in_bytes: u64,
    pub execution_info: Option<QueryExecutionInfo>,
    pub additional_headers: BTreeMap<String, String>,
    /// Set when the page cannot be resumed from (e.g. a global sort is in progress)
    pub disallow_continuation_token_message: Option<String>,
    /// `None` exactly when the producer is fully drained
    pub state: Option<QueryState>,
}

/// Tagged failure value carried through the stage chain
pub type QueryPageResult = Result<QueryPage, QueryError>;

/// Fresh activity id
pub fn new_activity_id() -> String {
    Uuid::new_v4().to_string()
}

impl QueryPage {
    pub fn new(
        documents: Vec<Value>,
        request_charge: f64,
        activity_id: impl Into<String>,
        state: Option<QueryState>,
    ) -> Self {
        Self {
            documents,
            request_charge,
            activity_id: activity_id.into(),
            response_length_in_bytes: 0,
            execution_info: None,
            additional_headers: BTreeMap::new(),
            disallow_continuation_token_message: None,
            state,
        }
    }

    /// A page without rows
    pub fn empty(
        request_charge: f64,
        activity_id: impl Into<String>,
        state: Option<QueryState>,
    ) -> Self {
        Self::new(Vec::new(), request_charge, activity_id, state)
    }

    /// Same metadata, new rows and state
    pub fn with_documents(&self, documents: Vec<Value>, state: Option<QueryState>) -> Self {
        Self {
            documents,
            request_charge: self.request_charge,
            activity_id: self.activity_id.clone(),
            response_length_in_bytes: self.response_length_in_bytes,
            execution_info: self.execution_info.clone(),
            additional_headers: self.additional_headers.clone(),
            disallow_continuation_token_message: self.disallow_continuation_token_message.clone(),
            state,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}
