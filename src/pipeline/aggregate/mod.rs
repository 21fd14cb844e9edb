//! Aggregate stage
//!
//! Folds every inner row into one `SingleGroupAggregator`. While the inner
//! stage has more, each pull yields an empty page whose state carries the
//! partial results; the single result page follows the last inner page.

mod aggregators;
mod single_group;

pub use aggregators::Aggregator;
pub use single_group::{AggregateValue, SingleGroupAggregator};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::stage::{take_inner_result, QueryPipelineStage};
use super::token::{source_token, unexpected_token, ContinuationToken};
use crate::errors::{QueryError, QueryResult};
use crate::observability::Trace;
use crate::pagination::{new_activity_id, QueryPage, QueryPageResult};
use crate::query::QueryInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateContinuationToken {
    /// Persisted `SingleGroupAggregator`
    pub aggregates: Value,
    pub source: Box<ContinuationToken>,
}

pub struct AggregateStage {
    inner: Box<QueryPipelineStage>,
    aggregator: SingleGroupAggregator,
    returned_final_page: bool,
    cancellation: CancellationToken,
    pub(crate) current: Option<QueryPageResult>,
}

impl AggregateStage {
    pub fn monadic_create<F>(
        query_info: &QueryInfo,
        continuation: Option<ContinuationToken>,
        cancellation: CancellationToken,
        create_source: F,
    ) -> QueryResult<QueryPipelineStage>
    where
        F: FnOnce(Option<ContinuationToken>) -> QueryResult<QueryPipelineStage>,
    {
        let (state, source) = match continuation {
            None => (None, None),
            Some(ContinuationToken::Aggregate(token)) => (Some(token.aggregates), Some(*token.source)),
            Some(other) => return Err(unexpected_token("aggregate", &other)),
        };
        let aggregator = SingleGroupAggregator::create(
            &query_info.aggregates,
            &query_info.group_by_alias_to_aggregate_type,
            &query_info.ordered_aliases(),
            query_info.has_select_value,
            state.as_ref(),
        )?;
        let inner = create_source(source)?;
        Ok(QueryPipelineStage::Aggregate(Self {
            inner: Box::new(inner),
            aggregator,
            returned_final_page: false,
            cancellation,
            current: None,
        }))
    }

    fn final_page(&mut self, request_charge: f64, activity_id: String) {
        self.returned_final_page = true;
        let documents = self.aggregator.result().into_iter().collect();
        self.current = Some(Ok(QueryPage::new(documents, request_charge, activity_id, None)));
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
        if !self.inner.move_next(trace).await {
            self.final_page(0.0, new_activity_id());
            return true;
        }

        let page = match take_inner_result(&mut self.inner) {
            Ok(page) => page,
            Err(error) => {
                self.current = Some(Err(error));
                return true;
            }
        };
        // Fold into a copy so a bad row leaves the persisted state intact.
        let mut folded = self.aggregator.clone();
        for row in &page.documents {
            if let Err(error) = folded.add_values(row) {
                self.current = Some(Err(error));
                return true;
            }
        }
        self.aggregator = folded;

        match source_token(page.state.as_ref()) {
            Ok(Some(source)) => {
                let state = ContinuationToken::Aggregate(AggregateContinuationToken {
                    aggregates: self.aggregator.to_state(),
                    source,
                })
                .to_state();
                self.current = Some(Ok(QueryPage {
                    documents: Vec::new(),
                    state: Some(state),
                    ..page
                }));
            }
            Ok(None) => self.final_page(page.request_charge, page.activity_id),
            Err(error) => self.current = Some(Err(error)),
        }
        true
    }

    pub(crate) fn dispose(&mut self) {
        self.inner.dispose();
        self.current = None;
    }
}
