//! GROUP BY
//!
//! Backend rows are `{"groupByItems": [...], "payload": ...}`. Partial
//! results are folded per group key until the source is drained, then the
//! groups are emitted `page_size` at a time. The whole table is persisted
//! in the continuation, both during the drain and during the flush.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::aggregate::SingleGroupAggregator;
use super::distinct::{distinct_hash, DistinctHash};
use super::order_by::deserialize_present;
use super::stage::{take_inner_result, EmptyStage, QueryPipelineStage};
use super::token::{source_token, unexpected_token, ContinuationToken};
use crate::errors::{QueryError, QueryResult};
use crate::observability::Trace;
use crate::pagination::{new_activity_id, QueryPage, QueryPageResult};
use crate::query::{AggregateOperator, QueryInfo};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupByContinuationToken {
    /// Persisted `SingleGroupAggregator` per group key
    pub grouping_table: BTreeMap<DistinctHash, Value>,
    /// `None` once the source is drained and only the flush remains
    #[serde(default)]
    pub source: Option<Box<ContinuationToken>>,
}

#[derive(Debug, Deserialize)]
struct GroupByRow {
    #[serde(rename = "groupByItems")]
    group_by_items: Vec<Value>,
    #[serde(default, deserialize_with = "deserialize_present")]
    payload: Option<Value>,
}

/// How a new group is shaped
struct GroupShape {
    aggregates: Vec<AggregateOperator>,
    alias_to_aggregate: BTreeMap<String, Option<AggregateOperator>>,
    ordered_aliases: Vec<String>,
    has_select_value: bool,
}

impl GroupShape {
    fn group(&self, state: Option<&Value>) -> QueryResult<SingleGroupAggregator> {
        SingleGroupAggregator::create(
            &self.aggregates,
            &self.alias_to_aggregate,
            &self.ordered_aliases,
            self.has_select_value,
            state,
        )
    }
}

pub struct GroupByStage {
    inner: Box<QueryPipelineStage>,
    shape: GroupShape,
    table: BTreeMap<DistinctHash, SingleGroupAggregator>,
    source_drained: bool,
    page_size: usize,
    pending_charge: f64,
    returned_final_page: bool,
    cancellation: CancellationToken,
    pub(crate) current: Option<QueryPageResult>,
}

impl GroupByStage {
    pub fn monadic_create<F>(
        query_info: &QueryInfo,
        page_size: usize,
        continuation: Option<ContinuationToken>,
        cancellation: CancellationToken,
        create_source: F,
    ) -> QueryResult<QueryPipelineStage>
    where
        F: FnOnce(Option<ContinuationToken>) -> QueryResult<QueryPipelineStage>,
    {
        let shape = GroupShape {
            aggregates: query_info.aggregates.clone(),
            alias_to_aggregate: query_info.group_by_alias_to_aggregate_type.clone(),
            ordered_aliases: query_info.ordered_aliases(),
            has_select_value: query_info.has_select_value,
        };

        let (table, source_drained, inner) = match continuation {
            None => (BTreeMap::new(), false, create_source(None)?),
            Some(ContinuationToken::GroupBy(token)) => {
                let mut table = BTreeMap::new();
                for (key, state) in &token.grouping_table {
                    table.insert(*key, shape.group(Some(state))?);
                }
                match token.source {
                    Some(source) => (table, false, create_source(Some(*source))?),
                    None => (table, true, EmptyStage::new().into_stage()),
                }
            }
            Some(other) => return Err(unexpected_token("groupBy", &other)),
        };

        Ok(QueryPipelineStage::GroupBy(Self {
            inner: Box::new(inner),
            shape,
            table,
            source_drained,
            page_size: page_size.max(1),
            pending_charge: 0.0,
            returned_final_page: false,
            cancellation,
            current: None,
        }))
    }

    fn table_state(&self) -> BTreeMap<DistinctHash, Value> {
        self.table
            .iter()
            .map(|(key, group)| (*key, group.to_state()))
            .collect()
    }

    fn fold(&mut self, documents: &[Value]) -> QueryResult<()> {
        for document in documents {
            let row: GroupByRow = serde_json::from_value(document.clone())
                .map_err(|e| QueryError::internal(format!("malformed group-by row: {}", e)))?;
            let key = distinct_hash(&Value::Array(row.group_by_items));
            let group = match self.table.entry(key) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(self.shape.group(None)?),
            };
            if let Some(payload) = &row.payload {
                group.add_values(payload)?;
            }
        }
        Ok(())
    }

    /// Pull one inner page; true when a page for the caller was produced
    async fn drain_step(&mut self, trace: &Trace) -> bool {
        if !self.inner.move_next(trace).await {
            self.source_drained = true;
            return false;
        }
        let page = match take_inner_result(&mut self.inner) {
            Ok(page) => page,
            Err(error) => {
                self.current = Some(Err(error));
                return true;
            }
        };
        if let Err(error) = self.fold(&page.documents) {
            self.current = Some(Err(error));
            return true;
        }
        match source_token(page.state.as_ref()) {
            Ok(Some(source)) => {
                let state = ContinuationToken::GroupBy(GroupByContinuationToken {
                    grouping_table: self.table_state(),
                    source: Some(source),
                })
                .to_state();
                self.current = Some(Ok(QueryPage {
                    documents: Vec::new(),
                    state: Some(state),
                    ..page
                }));
                true
            }
            Ok(None) => {
                self.source_drained = true;
                self.pending_charge += page.request_charge;
                false
            }
            Err(error) => {
                self.current = Some(Err(error));
                true
            }
        }
    }

    pub(crate) async fn move_next(&mut self, trace: &Trace) -> bool {
        if self.returned_final_page {
            self.current = None;
            return false;
        }
        if self.cancellation.is_cancelled() {
            self.current = Some(Err(QueryError::Cancelled));
            return true;
        }
        if !self.source_drained && self.drain_step(trace).await {
            return true;
        }

        let mut documents = Vec::new();
        while documents.len() < self.page_size {
            let (_, group) = match self.table.pop_first() {
                Some(entry) => entry,
                None => break,
            };
            if let Some(result) = group.result() {
                documents.push(result);
            }
        }
        let state = if self.table.is_empty() {
            self.returned_final_page = true;
            None
        } else {
            Some(
                ContinuationToken::GroupBy(GroupByContinuationToken {
                    grouping_table: self.table_state(),
                    source: None,
                })
                .to_state(),
            )
        };
        let charge = std::mem::take(&mut self.pending_charge);
        self.current = Some(Ok(QueryPage::new(documents, charge, new_activity_id(), state)));
        true
    }

    pub(crate) fn dispose(&mut self) {
        self.inner.dispose();
        self.table.clear();
        self.current = None;
    }
}
