//! DCOUNT: the number of rows a DISTINCT chain produces
//!
//! The factory places a Distinct stage below this one, so every row that
//! reaches it is already unique. The running count travels in the token.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::stage::{take_inner_result, QueryPipelineStage};
use super::token::{source_token, unexpected_token, ContinuationToken};
use crate::errors::{QueryError, QueryResult};
use crate::observability::Trace;
use crate::pagination::{new_activity_id, QueryPage, QueryPageResult};
use crate::query::DCountInfo;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DCountContinuationToken {
    /// Distinct rows counted so far
    pub count: u64,
    pub source: Box<ContinuationToken>,
}

pub struct DCountStage {
    inner: Box<QueryPipelineStage>,
    info: DCountInfo,
    count: u64,
    returned_final_page: bool,
    cancellation: CancellationToken,
    pub(crate) current: Option<QueryPageResult>,
}

impl DCountStage {
    pub fn monadic_create<F>(
        info: DCountInfo,
        continuation: Option<ContinuationToken>,
        cancellation: CancellationToken,
        create_source: F,
    ) -> QueryResult<QueryPipelineStage>
    where
        F: FnOnce(Option<ContinuationToken>) -> QueryResult<QueryPipelineStage>,
    {
        let (count, source) = match continuation {
            None => (0, None),
            Some(ContinuationToken::DCount(token)) => (token.count, Some(*token.source)),
            Some(other) => return Err(unexpected_token("dCount", &other)),
        };
        let inner = create_source(source)?;
        Ok(QueryPipelineStage::DCount(Self {
            inner: Box::new(inner),
            info,
            count,
            returned_final_page: false,
            cancellation,
            current: None,
        }))
    }

    fn result(&self) -> Value {
        if self.info.is_value_aggregate() {
            json!(self.count)
        } else {
            let mut object = Map::new();
            object.insert(self.info.d_count_alias.clone(), json!(self.count));
            Value::Object(object)
        }
    }

    fn final_page(&mut self, request_charge: f64, activity_id: String) {
        self.returned_final_page = true;
        let documents = vec![self.result()];
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
        let source = match source_token(page.state.as_ref()) {
            Ok(source) => source,
            Err(error) => {
                self.current = Some(Err(error));
                return true;
            }
        };
        self.count += page.documents.len() as u64;

        match source {
            Some(source) => {
                let state = ContinuationToken::DCount(DCountContinuationToken {
                    count: self.count,
                    source,
                })
                .to_state();
                self.current = Some(Ok(QueryPage {
                    documents: Vec::new(),
                    state: Some(state),
                    ..page
                }));
            }
            None => self.final_page(page.request_charge, page.activity_id),
        }
        true
    }

    pub(crate) fn dispose(&mut self) {
        self.inner.dispose();
        self.current = None;
    }
}
