//! Fixtures shared by stage tests

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::context::CrossPartitionContext;
use super::parallel::ParallelCrossPartitionStage;
use super::stage::QueryPipelineStage;
use super::token::ContinuationToken;
use crate::errors::QueryResult;
use crate::observability::Trace;
use crate::pagination::{DocumentContainer, InMemoryContainer, QueryPage};
use crate::query::SqlQuerySpec;

/// One partition holding `values` in insertion order
pub(crate) fn container_of(values: &[Value]) -> Arc<InMemoryContainer> {
    let container = Arc::new(InMemoryContainer::new(1));
    for (i, value) in values.iter().enumerate() {
        container.insert(&format!("pk-{}", i), value.clone());
    }
    container
}

pub(crate) fn context_for(container: &Arc<InMemoryContainer>, page_size: usize) -> CrossPartitionContext {
    let source: Arc<dyn DocumentContainer> = Arc::clone(container) as Arc<dyn DocumentContainer>;
    CrossPartitionContext::new(
        source,
        SqlQuerySpec::new("SELECT VALUE c FROM c"),
        container.ranges(),
        page_size,
        CancellationToken::new(),
    )
}

pub(crate) fn parallel_source(
    context: &CrossPartitionContext,
) -> impl FnOnce(Option<ContinuationToken>) -> QueryResult<QueryPipelineStage> + '_ {
    move |token| ParallelCrossPartitionStage::monadic_create(context, token)
}

/// Every page until exhaustion; panics on a failure page
pub(crate) async fn drain_pages(stage: &mut QueryPipelineStage) -> Vec<QueryPage> {
    let trace = Trace::root("test");
    let mut pages = Vec::new();
    while stage.move_next(&trace).await {
        pages.push(stage.take_current().unwrap().unwrap());
    }
    pages
}

pub(crate) fn rows(pages: &[QueryPage]) -> Vec<Value> {
    pages.iter().flat_map(|page| page.documents.clone()).collect()
}
