//! OFFSET: drop the first N rows of the concatenated inner pages

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::stage::{take_inner_result, QueryPipelineStage};
use super::token::{source_token, unexpected_token, ContinuationToken};
use crate::errors::{QueryError, QueryResult};
use crate::observability::Trace;
use crate::pagination::{QueryPage, QueryPageResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipContinuationToken {
    /// Rows still to drop
    pub skip_count: u64,
    pub source: Box<ContinuationToken>,
}

pub struct SkipStage {
    inner: Box<QueryPipelineStage>,
    skip_count: u64,
    cancellation: CancellationToken,
    pub(crate) current: Option<QueryPageResult>,
}

impl SkipStage {
    pub fn monadic_create<F>(
        offset: u64,
        continuation: Option<ContinuationToken>,
        cancellation: CancellationToken,
        create_source: F,
    ) -> QueryResult<QueryPipelineStage>
    where
        F: FnOnce(Option<ContinuationToken>) -> QueryResult<QueryPipelineStage>,
    {
        let (skip_count, source) = match continuation {
            None => (offset, None),
            Some(ContinuationToken::Skip(token)) => {
                if token.skip_count > offset {
                    return Err(QueryError::malformed(format!(
                        "skip count {} in continuation exceeds the query offset {}",
                        token.skip_count, offset
                    )));
                }
                (token.skip_count, Some(*token.source))
            }
            Some(other) => return Err(unexpected_token("skip", &other)),
        };
        let inner = create_source(source)?;
        Ok(QueryPipelineStage::Skip(Self {
            inner: Box::new(inner),
            skip_count,
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

        let skipped = (self.skip_count as usize).min(page.documents.len());
        self.skip_count -= skipped as u64;
        let documents = page.documents[skipped..].to_vec();

        let state = match source_token(page.state.as_ref()) {
            Ok(source) => source.map(|source| {
                ContinuationToken::Skip(SkipContinuationToken {
                    skip_count: self.skip_count,
                    source,
                })
                .to_state()
            }),
            Err(error) => {
                self.current = Some(Err(error));
                return true;
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
    async fn test_skip_one_of_two() {
        let container = container_of(&[json!(42), json!(1337)]);
        let context = context_for(&container, 1);
        let mut stage =
            SkipStage::monadic_create(1, None, CancellationToken::new(), parallel_source(&context)).unwrap();
        assert_eq!(rows(&drain_pages(&mut stage).await), vec![json!(1337)]);
    }

    #[tokio::test]
    async fn test_skip_spans_pages() {
        let values: Vec<_> = (0..5).map(|i| json!(i)).collect();
        let container = container_of(&values);
        let context = context_for(&container, 2);
        let mut stage =
            SkipStage::monadic_create(3, None, CancellationToken::new(), parallel_source(&context)).unwrap();
        let pages = drain_pages(&mut stage).await;
        assert_eq!(rows(&pages), vec![json!(3), json!(4)]);

        assert!(pages[0].documents.is_empty());
        match ContinuationToken::from_state(pages[0].state.as_ref().unwrap()).unwrap() {
            ContinuationToken::Skip(token) => assert_eq!(token.skip_count, 1),
            other => panic!("unexpected token {:?}", other),
        }
        assert!(pages.last().unwrap().state.is_none());
    }

    #[test]
    fn test_count_above_offset_rejected() {
        let token = ContinuationToken::Skip(SkipContinuationToken {
            skip_count: 5,
            source: ContinuationToken::Parallel(crate::pipeline::parallel::ParallelContinuationToken {
                ranges: vec![],
            })
            .boxed(),
        });
        let result = SkipStage::monadic_create(2, Some(token), CancellationToken::new(), |_| {
            Ok(crate::pipeline::stage::EmptyStage::new().into_stage())
        });
        assert!(matches!(result, Err(QueryError::MalformedContinuationToken(_))));
    }
}
