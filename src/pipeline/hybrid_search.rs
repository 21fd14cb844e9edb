//! Hybrid search stage
//!
//! Runs in four phases:
//! 1. gather corpus statistics over every range of the container (only
//!    when a component scores by full text)
//! 2. substitute them into each component plan and drain every component
//!    to the end, components side by side
//! 3. fuse the component rankings by reciprocal rank
//! 4. hand the fused rows out in pages
//!
//! Component sources emit whole backend rows:
//!
//! ```json
//! {"_rid": "...", "orderByItems": [...], "payload": {"payload": {...}, "componentScores": [0.8, 12.5]}}
//! ```
//!
//! With a single component there is nothing to fuse and its pages are
//! forwarded as they arrive. Hybrid results cannot be resumed; every page
//! carries a marker token and a message saying so.

use std::cmp::Ordering;
use std::collections::VecDeque;

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::context::CrossPartitionContext;
use super::factory::PipelineFactory;
use super::parallel::ParallelCrossPartitionStage;
use super::stage::{take_inner_result, QueryPipelineStage};
use super::token::ContinuationToken;
use crate::errors::{QueryError, QueryResult};
use crate::observability::{PipelineEvent, Trace};
use crate::pagination::{new_activity_id, PrefetchPolicy, QueryPage, QueryPageResult, QueryState};
use crate::query::{GlobalFullTextSearchStatistics, HybridSearchQueryInfo, QueryInfo, SqlQuerySpec};

/// `k` in `1 / (k + rank)`
const RRF_CONSTANT: f64 = 60.0;

const MAXIMUM_PAGE_SIZE: usize = 2048;

pub const HYBRID_SEARCH_DISALLOW_MESSAGE: &str =
    "continuation tokens are not supported for hybrid search queries";

/// State of a page with more hybrid results behind it; never resumable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HybridSearchContinuationToken {}

/// One component row
#[derive(Debug, Clone, PartialEq)]
pub struct HybridSearchResult {
    pub rid: String,
    pub component_scores: Vec<f64>,
    /// `None` when the projection is undefined for this row
    pub payload: Option<Value>,
}

impl HybridSearchResult {
    pub fn parse(document: Value) -> QueryResult<Self> {
        let rid = document
            .get("_rid")
            .and_then(Value::as_str)
            .ok_or_else(|| QueryError::internal("hybrid search row has no _rid"))?
            .to_string();
        let outer = document
            .get("payload")
            .and_then(Value::as_object)
            .ok_or_else(|| QueryError::internal(format!("hybrid search row {} has no payload", rid)))?;
        let component_scores = outer
            .get("componentScores")
            .and_then(Value::as_array)
            .ok_or_else(|| QueryError::internal(format!("hybrid search row {} has no componentScores", rid)))?
            .iter()
            .map(|score| {
                score.as_f64().ok_or_else(|| {
                    QueryError::internal(format!("component score {} of row {} is not a number", score, rid))
                })
            })
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(Self {
            rid,
            component_scores,
            payload: outer.get("payload").cloned(),
        })
    }
}

/// Order results by summed reciprocal rank, best first
///
/// Duplicate rids (the same row returned by several components) keep the
/// first occurrence. Within a component, equal scores share a rank. Rows
/// with equal fused scores stay in rid order.
pub fn fuse_ranks(mut results: Vec<HybridSearchResult>, component_count: usize) -> QueryResult<Vec<HybridSearchResult>> {
    results.sort_by(|a, b| a.rid.cmp(&b.rid));
    results.dedup_by(|later, earlier| later.rid == earlier.rid);

    if let Some(result) = results.iter().find(|r| r.component_scores.len() != component_count) {
        return Err(QueryError::internal(format!(
            "row {} has {} component scores, query has {} components",
            result.rid,
            result.component_scores.len(),
            component_count
        )));
    }

    let mut fused = vec![0.0f64; results.len()];
    let mut order: Vec<usize> = (0..results.len()).collect();
    for component in 0..component_count {
        let score = |index: usize| results[index].component_scores[component];
        order.sort_by(|&a, &b| score(b).total_cmp(&score(a)));
        let mut rank = 0usize;
        let mut previous: Option<f64> = None;
        for &index in &order {
            if previous != Some(score(index)) {
                rank += 1;
                previous = Some(score(index));
            }
            fused[index] += 1.0 / (RRF_CONSTANT + rank as f64);
        }
    }

    let mut ranked: Vec<(f64, HybridSearchResult)> = fused.into_iter().zip(results).collect();
    ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    Ok(ranked.into_iter().map(|(_, result)| result).collect())
}

enum Phase {
    GatherStatistics,
    RunComponents,
    Draining,
    Done,
}

struct ComponentSlot {
    stage: QueryPipelineStage,
    results: Vec<HybridSearchResult>,
    charge: f64,
    finished: bool,
    failure: Option<QueryError>,
}

impl ComponentSlot {
    /// Pull pages until the component ends or fails; rows gathered so far
    /// are kept across a failure.
    async fn drain(&mut self, trace: &Trace) {
        while self.stage.move_next(trace).await {
            let page = match take_inner_result(&mut self.stage) {
                Ok(page) => page,
                Err(error) => {
                    self.failure = Some(error);
                    return;
                }
            };
            self.charge += page.request_charge;
            for document in page.documents {
                match HybridSearchResult::parse(document) {
                    Ok(result) => self.results.push(result),
                    Err(error) => {
                        self.failure = Some(error);
                        return;
                    }
                }
            }
        }
        self.finished = true;
    }
}

pub struct HybridSearchStage {
    context: CrossPartitionContext,
    info: HybridSearchQueryInfo,
    phase: Phase,
    statistics_source: Option<Box<QueryPipelineStage>>,
    statistics: Option<GlobalFullTextSearchStatistics>,
    /// Set when the plan has exactly one component
    forwarded: Option<Box<QueryPipelineStage>>,
    components: Vec<ComponentSlot>,
    ranked: VecDeque<HybridSearchResult>,
    pending_charge: f64,
    page_size: usize,
    cancellation: CancellationToken,
    pub(crate) current: Option<QueryPageResult>,
}

impl HybridSearchStage {
    pub fn monadic_create(
        context: &CrossPartitionContext,
        info: &HybridSearchQueryInfo,
        continuation: Option<ContinuationToken>,
    ) -> QueryResult<QueryPipelineStage> {
        if continuation.is_some() {
            return Err(QueryError::invalid_argument(HYBRID_SEARCH_DISALLOW_MESSAGE));
        }
        info.validate()?;
        let phase = if info.requires_global_statistics {
            Phase::GatherStatistics
        } else {
            Phase::RunComponents
        };
        Ok(QueryPipelineStage::HybridSearch(Self {
            context: context.clone(),
            info: info.clone(),
            phase,
            statistics_source: None,
            statistics: None,
            forwarded: None,
            components: Vec::new(),
            ranked: VecDeque::new(),
            pending_charge: 0.0,
            page_size: context.page_size.clamp(1, MAXIMUM_PAGE_SIZE),
            cancellation: context.cancellation.clone(),
            current: None,
        }))
    }

    fn marker_state() -> QueryState {
        ContinuationToken::HybridSearch(HybridSearchContinuationToken {}).to_state()
    }

    fn hybrid_page(documents: Vec<Value>, charge: f64, state: Option<QueryState>) -> QueryPage {
        let mut page = QueryPage::new(documents, charge, new_activity_id(), state);
        page.disallow_continuation_token_message = Some(HYBRID_SEARCH_DISALLOW_MESSAGE.to_string());
        page
    }

    fn with_query_text(&self, query_text: &str) -> SqlQuerySpec {
        SqlQuerySpec {
            query_text: query_text.to_string(),
            parameters: self.context.query.parameters.clone(),
        }
    }

    /// Sum the statistics rows of every range
    async fn gather_statistics(&mut self, trace: &Trace) -> QueryResult<()> {
        if self.statistics_source.is_none() {
            let ranges = self
                .context
                .container
                .get_feed_ranges(trace, &self.cancellation)
                .await?;
            let mut context = self.context.clone().with_prefetch_policy(PrefetchPolicy::PrefetchAll);
            context.query = self.with_query_text(&self.info.global_statistics_query);
            context.target_ranges = ranges;
            context.target_ranges.sort();
            let source = ParallelCrossPartitionStage::monadic_create(&context, None)?;
            self.statistics_source = Some(Box::new(source));
        }
        let source = match self.statistics_source.as_mut() {
            Some(source) => source,
            None => return Err(QueryError::internal("statistics source missing")),
        };

        let statistics_trace = trace.start_child("GlobalStatistics");
        while source.move_next(&statistics_trace).await {
            let page = take_inner_result(source)?;
            self.pending_charge += page.request_charge;
            for document in page.documents {
                let row: GlobalFullTextSearchStatistics = serde_json::from_value(document)
                    .map_err(|e| QueryError::internal(format!("malformed statistics row: {}", e)))?;
                match self.statistics.as_mut() {
                    Some(total) => total.add(&row)?,
                    None => self.statistics = Some(row),
                }
            }
        }
        if let Some(statistics) = &self.statistics {
            tracing::debug!(
                event = %PipelineEvent::GlobalStatisticsGathered,
                document_count = statistics.document_count,
                functions = statistics.full_text_statistics.len(),
                "hybrid search statistics gathered"
            );
        }
        self.statistics_source = None;
        Ok(())
    }

    fn component_plan(&self, component: &QueryInfo) -> QueryResult<QueryInfo> {
        match &self.statistics {
            Some(statistics) => statistics.rewrite_component(component, self.info.component_query_infos.len()),
            None => Ok(component.clone()),
        }
    }

    fn create_components(&mut self) -> QueryResult<()> {
        let mut stages = Vec::with_capacity(self.info.component_query_infos.len());
        for component in &self.info.component_query_infos {
            let plan = self.component_plan(component)?;
            let mut context = self
                .context
                .clone()
                .with_prefetch_policy(PrefetchPolicy::PrefetchAll)
                .with_raw_order_by_payload(true);
            if !plan.rewritten_query.is_empty() {
                context.query = self.with_query_text(&plan.rewritten_query);
            }
            stages.push(PipelineFactory::monadic_create(&context, &plan, None)?);
        }

        if stages.len() == 1 {
            self.forwarded = stages.pop().map(Box::new);
        } else {
            self.components = stages
                .into_iter()
                .map(|stage| ComponentSlot {
                    stage,
                    results: Vec::new(),
                    charge: 0.0,
                    finished: false,
                    failure: None,
                })
                .collect();
        }
        Ok(())
    }

    /// Drain every component at once, at most `max_concurrency` at a time
    async fn run_components(&mut self, trace: &Trace) -> QueryResult<()> {
        let limit = self.context.max_concurrency.max(1) as usize;
        stream::iter(self.components.iter_mut().filter(|slot| !slot.finished))
            .for_each_concurrent(limit, |slot| async move {
                slot.failure = None;
                slot.drain(trace).await;
            })
            .await;
        if let Some(error) = self.components.iter_mut().find_map(|slot| slot.failure.take()) {
            return Err(error);
        }

        let mut results = Vec::new();
        for slot in &mut self.components {
            self.pending_charge += std::mem::take(&mut slot.charge);
            results.append(&mut slot.results);
        }
        let component_count = self.components.len();
        let fused = fuse_ranks(results, component_count)?;
        tracing::debug!(
            event = %PipelineEvent::RanksFused,
            components = component_count,
            rows = fused.len(),
            "hybrid search ranks fused"
        );
        self.ranked = fused.into();
        for slot in &mut self.components {
            slot.stage.dispose();
        }
        self.components.clear();
        Ok(())
    }

    /// Next page of the only component, payloads unwrapped
    async fn forward(&mut self, trace: &Trace) -> bool {
        let source = match self.forwarded.as_mut() {
            Some(source) => source,
            None => {
                self.current = Some(Err(QueryError::internal("single component source missing")));
                return true;
            }
        };
        if !source.move_next(trace).await {
            self.phase = Phase::Done;
            self.current = None;
            return false;
        }
        let page = match take_inner_result(source) {
            Ok(page) => page,
            Err(error) => {
                self.current = Some(Err(error));
                return true;
            }
        };
        let documents = match page
            .documents
            .into_iter()
            .map(HybridSearchResult::parse)
            .collect::<QueryResult<Vec<_>>>()
        {
            Ok(results) => results.into_iter().filter_map(|result| result.payload).collect(),
            Err(error) => {
                self.fail(error);
                return true;
            }
        };
        let charge = page.request_charge + std::mem::take(&mut self.pending_charge);
        let state = page.state.map(|_| Self::marker_state());
        self.current = Some(Ok(Self::hybrid_page(documents, charge, state)));
        true
    }

    /// Surface `error`; malformed component output ends the query
    fn fail(&mut self, error: QueryError) {
        if matches!(error, QueryError::Internal(_)) {
            self.phase = Phase::Done;
        }
        self.current = Some(Err(error));
    }

    pub(crate) async fn move_next(&mut self, trace: &Trace) -> bool {
        if self.cancellation.is_cancelled() {
            self.current = Some(Err(QueryError::Cancelled));
            return true;
        }
        loop {
            match self.phase {
                Phase::GatherStatistics => {
                    if let Err(error) = self.gather_statistics(trace).await {
                        self.fail(error);
                        return true;
                    }
                    self.phase = Phase::RunComponents;
                }
                Phase::RunComponents => {
                    if self.forwarded.is_none() && self.components.is_empty() {
                        if let Err(error) = self.create_components() {
                            self.phase = Phase::Done;
                            self.current = Some(Err(error));
                            return true;
                        }
                    }
                    if self.forwarded.is_some() {
                        return self.forward(trace).await;
                    }
                    if let Err(error) = self.run_components(trace).await {
                        self.fail(error);
                        return true;
                    }
                    self.phase = Phase::Draining;
                    // The ranking costs every component fetch; report it before any row.
                    let charge = std::mem::take(&mut self.pending_charge);
                    self.current = Some(Ok(Self::hybrid_page(Vec::new(), charge, Some(Self::marker_state()))));
                    return true;
                }
                Phase::Draining => {
                    let take = self.page_size.min(self.ranked.len());
                    let documents: Vec<Value> = self.ranked.drain(..take).filter_map(|result| result.payload).collect();
                    let state = if self.ranked.is_empty() {
                        self.phase = Phase::Done;
                        None
                    } else {
                        Some(Self::marker_state())
                    };
                    self.current = Some(Ok(Self::hybrid_page(documents, 0.0, state)));
                    return true;
                }
                Phase::Done => {
                    self.current = None;
                    return false;
                }
            }
        }
    }

    pub(crate) fn dispose(&mut self) {
        if let Some(source) = self.statistics_source.as_mut() {
            source.dispose();
        }
        if let Some(source) = self.forwarded.as_mut() {
            source.dispose();
        }
        for slot in &mut self.components {
            slot.stage.dispose();
        }
        self.components.clear();
        self.ranked.clear();
        self.phase = Phase::Done;
        self.current = None;
    }
}
