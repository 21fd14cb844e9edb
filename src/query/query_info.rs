//! Compiled query plan
//!
//! `QueryInfo` is produced by the query-plan service and describes which
//! client-side operators a query needs. Field names follow the plan's JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::hybrid_search_info::HybridSearchQueryInfo;
use crate::errors::{QueryError, QueryResult};

/// Per-column sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn is_ascending(&self) -> bool {
        matches!(self, SortOrder::Ascending)
    }
}

/// Aggregate operators evaluated client-side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateOperator {
    Average,
    Count,
    CountIf,
    Max,
    Min,
    MakeList,
    MakeSet,
    Sum,
}

/// Distinct mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistinctQueryType {
    #[default]
    None,
    /// Input is sorted; only adjacent duplicates can occur
    Ordered,
    Unordered,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DCountInfo {
    /// Output alias; empty for `SELECT VALUE COUNT(1)`
    #[serde(default)]
    pub d_count_alias: String,
}

impl DCountInfo {
    pub fn is_value_aggregate(&self) -> bool {
        self.d_count_alias.is_empty()
    }
}

/// Compiled plan for one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryInfo {
    pub distinct_type: DistinctQueryType,
    pub top: Option<u64>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub order_by: Vec<SortOrder>,
    pub order_by_expressions: Vec<String>,
    pub group_by_expressions: Vec<String>,
    pub group_by_aliases: Vec<String>,
    pub aggregates: Vec<AggregateOperator>,
    pub group_by_alias_to_aggregate_type: BTreeMap<String, Option<AggregateOperator>>,
    pub rewritten_query: String,
    pub has_select_value: bool,
    #[serde(rename = "dCountInfo")]
    pub d_count_info: Option<DCountInfo>,
    pub has_non_streaming_order_by: bool,
    /// Set when the query fuses several ranked component queries
    pub hybrid_search_query_info: Option<HybridSearchQueryInfo>,
}

impl QueryInfo {
    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn has_aggregates(&self) -> bool {
        !self.aggregates.is_empty()
            || self
                .group_by_alias_to_aggregate_type
                .values()
                .any(|aggregate| aggregate.is_some())
    }

    pub fn has_group_by(&self) -> bool {
        !self.group_by_expressions.is_empty()
    }

    pub fn has_distinct(&self) -> bool {
        self.distinct_type != DistinctQueryType::None
    }

    pub fn has_dcount(&self) -> bool {
        self.d_count_info.is_some()
    }

    pub fn is_hybrid_search(&self) -> bool {
        self.hybrid_search_query_info.is_some()
    }

    /// Select-list aliases in projection order
    pub fn ordered_aliases(&self) -> Vec<String> {
        if !self.group_by_aliases.is_empty() {
            return self.group_by_aliases.clone();
        }
        self.group_by_alias_to_aggregate_type.keys().cloned().collect()
    }

    /// Reject plans no pipeline can execute
    pub fn validate(&self) -> QueryResult<()> {
        if let Some(hybrid) = &self.hybrid_search_query_info {
            return hybrid.validate();
        }
        if self.order_by.len() != self.order_by_expressions.len() {
            return Err(QueryError::invalid_argument(format!(
                "{} sort orders but {} order-by expressions",
                self.order_by.len(),
                self.order_by_expressions.len()
            )));
        }
        if self.offset.is_some() && self.limit.is_none() {
            return Err(QueryError::invalid_argument("OFFSET requires LIMIT"));
        }
        if self.top.is_some() && self.limit.is_some() {
            return Err(QueryError::invalid_argument(
                "TOP and OFFSET/LIMIT cannot be combined",
            ));
        }
        if self.has_non_streaming_order_by && !self.has_order_by() {
            return Err(QueryError::invalid_argument(
                "non-streaming order by needs sort columns",
            ));
        }
        if self.has_select_value && self.aggregates.len() > 1 && !self.has_group_by() {
            return Err(QueryError::invalid_argument(
                "SELECT VALUE takes a single aggregate",
            ));
        }
        Ok(())
    }
}
