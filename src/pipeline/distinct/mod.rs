//! DISTINCT
//!
//! One inner page in, one page out with the repeated rows removed. The
//! map of seen rows travels in the continuation token.

mod hash;
mod map;

pub use hash::{distinct_hash, DistinctHash};
pub use map::{DistinctMap, DistinctMapToken};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::stage::{take_inner_result, QueryPipelineStage};
use super::token::{source_token, unexpected_token, ContinuationToken};
use crate::errors::{QueryError, QueryResult};
use crate::observability::Trace;
use crate::pagination::{QueryPage, QueryPageResult};
use crate::query::DistinctQueryType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistinctContinuationToken {
    pub distinct_map: DistinctMapToken,
    pub source: Box<ContinuationToken>,
}

pub struct DistinctStage {
    inner: Box<QueryPipelineStage>,
    map: DistinctMap,
    cancellation: CancellationToken,
    pub(crate) current: Option<QueryPageResult>,
}

impl DistinctStage {
    pub fn monadic_create<F>(
        distinct_type: DistinctQueryType,
        continuation: Option<ContinuationToken>,
        cancellation: CancellationToken,
        create_source: F,
    ) -> QueryResult<QueryPipelineStage>
    where
        F: FnOnce(Option<ContinuationToken>) -> QueryResult<QueryPipelineStage>,
    {
        let (map, source) = match continuation {
            None => (DistinctMap::new(distinct_type)?, None),
            Some(ContinuationToken::Distinct(token)) => (
                DistinctMap::from_token(distinct_type, &token.distinct_map)?,
                Some(*token.source),
            ),
            Some(other) => return Err(unexpected_token("distinct", &other)),
        };
        let inner = create_source(source)?;
        Ok(QueryPipelineStage::Distinct(Self {
            inner: Box::new(inner),
            map,
            cancellation,
            current: None,
        }))
    }

    pub(crate) async fn move_next(&mut self, trace: &Trace) -> bool {
        if self.cancellation.is_cancelled() {
            self.current = Some(Err(QueryError::Cancelled));
            return true;
        }
        if !self.inner.move_next(trace).await {
            self.current = None;
            return false;
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

        let mut documents = Vec::with_capacity(page.documents.len());
        for row in page.documents.iter() {
            if self.map.add(row) {
                documents.push(row.clone());
            }
        }
        let state = source.map(|source| {
            ContinuationToken::Distinct(DistinctContinuationToken {
                distinct_map: self.map.to_token(),
                source,
            })
            .to_state()
        });
        self.current = Some(Ok(QueryPage {
            documents,
            state,
            ..page
        }));
        true
    }

    pub(crate) fn dispose(&mut self) {
        self.inner.dispose();
        self.current = None;
    }
}
