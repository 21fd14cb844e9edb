//! TOP / LIMIT: forward rows until the budget is spent

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::stage::{take_inner_result, QueryPipelineStage};
use super::token::{source_token, unexpected_token, ContinuationToken};
use crate::errors::{QueryError, QueryResult};
use crate::observability::Trace;
use crate::pagination::{QueryPage, QueryPageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TakeKind {
    Limit,
    Top,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeContinuationToken {
    pub take_kind: TakeKind,
    /// Rows still to forward
    pub take_count: u64,
    pub source: Box<ContinuationToken>,
}

pub struct TakeStage {
    inner: Box<QueryPipelineStage>,
    kind: TakeKind,
    take_count: u64,
    cancellation: CancellationToken,
    pub(crate) current: Option<QueryPageResult>,
}

impl TakeStage {
    pub fn monadic_create<F>(
        kind: TakeKind,
        count: u64,
        continuation: Option<ContinuationToken>,
        cancellation: CancellationToken,
        create_source: F,
    ) -> QueryResult<QueryPipelineStage>
    where
        F: FnOnce(Option<ContinuationToken>) -> QueryResult<QueryPipelineStage>,
    {
        let (take_count, source) = match continuation {
            None => (count, None),
            Some(ContinuationToken::Take(token)) => {
                if token.take_kind != kind {
                    return Err(QueryError::malformed(format!(
                        "continuation is for {:?}, query uses {:?}",
                        token.take_kind, kind
                    )));
                }
                if token.take_count > count {
                    return Err(QueryError::malformed(format!(
                        "take count {} in continuation exceeds the query count {}",
                        token.take_count, count
                    )));
                }
                (token.take_count, Some(*token.source))
            }
            Some(other) => return Err(unexpected_token("take", &other)),
        };
        let inner = create_source(source)?;
        Ok(QueryPipelineStage::Take(Self {
            inner: Box::new(inner),
            kind,
            take_count,
            cancellation,
            current: None,
        }))
    }

    pub(crate) async fn move_next(&mut self, trace: &Trace) -> bool {
        if self.take_count == 0 {
            self.current = None;
            return false;
        }
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

        let mut documents = page.documents;
        documents.truncate(self.take_count as usize);
        self.take_count -= documents.len() as u64;

        let state = if self.take_count == 0 {
            None
        } else {
            match source_token(page.state.as_ref()) {
                Ok(source) => source.map(|source| {
                    ContinuationToken::Take(TakeContinuationToken {
                        take_kind: self.kind,
                        take_count: self.take_count,
                        source,
                    })
                    .to_state()
                }),
                Err(error) => {
                    self.current = Some(Err(error));
                    return true;
                }
            }
        };
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{container_of, context_for, drain_pages, parallel_source, rows};
    use serde_json::json;

    #[tokio::test]
    async fn test_take_first_of_two() {
        let container = container_of(&[json!(42), json!(1337)]);
        let context = context_for(&container, 1);
        let mut stage = TakeStage::monadic_create(
            TakeKind::Limit,
            1,
            None,
            CancellationToken::new(),
            parallel_source(&context),
        )
        .unwrap();
        let pages = drain_pages(&mut stage).await;
        assert_eq!(rows(&pages), vec![json!(42)]);
        assert!(pages[0].state.is_none());
    }

    #[tokio::test]
    async fn test_zero_budget_never_pulls() {
        let container = container_of(&[json!(1), json!(2)]);
        let context = context_for(&container, 10);
        let mut stage =
            TakeStage::monadic_create(TakeKind::Top, 0, None, CancellationToken::new(), parallel_source(&context))
                .unwrap();
        assert!(drain_pages(&mut stage).await.is_empty());
        assert_eq!(container.query_calls(), 0);
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let token = ContinuationToken::Take(TakeContinuationToken {
            take_kind: TakeKind::Top,
            take_count: 1,
            source: ContinuationToken::Parallel(crate::pipeline::parallel::ParallelContinuationToken {
                ranges: vec![],
            })
            .boxed(),
        });
        let result = TakeStage::monadic_create(TakeKind::Limit, 3, Some(token), CancellationToken::new(), |_| {
            Ok(crate::pipeline::stage::EmptyStage::new().into_stage())
        });
        assert!(matches!(result, Err(QueryError::MalformedContinuationToken(_))));
    }
}
