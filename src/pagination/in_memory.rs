//! In-memory document container
//!
//! A complete `DocumentContainer` over process memory: hash-partitioned
//! ranges, generated rids, live `split`/`merge`, pluggable row shaping
//! (chosen per query by a marker in its text) and queued fault injection. Used as the reference data source for tests and
//! for exercising pipelines without a backend.
//!
//! A request against a range that is not exactly one current partition
//! fails with `PartitionGone`, the same way a real backend reports a split
//! or merge.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use super::container::{FeedRangeProvider, QueryDataSource, QueryPaginationOptions};
use super::feed_range::{FeedRange, MAX_EPK, MIN_EPK};
use super::page::{new_activity_id, QueryPage};
use super::resource_id::{compare_rids, ResourceId};
use super::state::{FeedRangeState, QueryState};
use crate::config::DEFAULT_PAGE_SIZE;
use crate::errors::{QueryError, QueryResult};
use crate::observability::Trace;
use crate::pipeline::order_by::{compare_positions, OrderByItem, OrderByRow};
use crate::query::{SortOrder, SqlQuerySpec};

/// Numeric width of the hash space; `"FF"` pads to this value
const EPK_SPACE: u64 = 0xFF00_0000;

const BASE_CHARGE: f64 = 1.0;
const CHARGE_PER_DOCUMENT: f64 = 0.5;

/// Maps a stored document to a result row; `None` filters it out
pub type RowProjection = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Folds the projected rows of one page, e.g. into partial aggregates
pub type PageReducer = Arc<dyn Fn(Vec<Value>) -> Vec<Value> + Send + Sync>;

/// How the container shapes rows for a query
#[derive(Clone, Default)]
pub struct QueryBehavior {
    order_by: Vec<(String, SortOrder)>,
    projection: Option<RowProjection>,
    page_reducer: Option<PageReducer>,
}

impl QueryBehavior {
    /// Documents in rid order, unchanged
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Rows sorted by top-level fields, wrapped as order-by rows
    pub fn order_by(fields: &[(&str, SortOrder)]) -> Self {
        Self {
            order_by: fields
                .iter()
                .map(|(field, order)| (field.to_string(), *order))
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_projection(
        mut self,
        projection: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.projection = Some(Arc::new(projection));
        self
    }

    pub fn with_page_reducer(
        mut self,
        reducer: impl Fn(Vec<Value>) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        self.page_reducer = Some(Arc::new(reducer));
        self
    }

    fn orders(&self) -> Vec<SortOrder> {
        self.order_by.iter().map(|(_, order)| *order).collect()
    }

    fn sort_items(&self, body: &Value) -> Vec<OrderByItem> {
        self.order_by
            .iter()
            .map(|(field, _)| OrderByItem {
                item: body.get(field).cloned(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    rid: String,
    epk: String,
    body: Value,
}

#[derive(Debug, Clone)]
struct Partition {
    range: FeedRange,
    documents: Vec<StoredDocument>,
}

struct Fault {
    range: Option<FeedRange>,
    after_calls: u64,
    error: QueryError,
}

struct ContainerState {
    partitions: Vec<Partition>,
    next_document: u64,
    faults: Vec<Fault>,
}

pub struct InMemoryContainer {
    state: Mutex<ContainerState>,
    behavior: QueryBehavior,
    /// Behaviors for queries whose text contains the marker; first match wins
    routes: Vec<(String, QueryBehavior)>,
    query_calls: AtomicU64,
    refresh_calls: AtomicU64,
}

fn lock(state: &Mutex<ContainerState>) -> MutexGuard<'_, ContainerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn epk_to_u64(epk: &str) -> u64 {
    if epk.is_empty() {
        return 0;
    }
    let padded = format!("{:0<8}", epk);
    u64::from_str_radix(&padded[..8], 16).unwrap_or(EPK_SPACE)
}

fn u64_to_epk(value: u64) -> String {
    format!("{:08X}", value)
}

/// Effective partition key of a logical partition key
pub fn effective_partition_key(partition_key: &str) -> String {
    let digest = Sha256::digest(partition_key.as_bytes());
    let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as u64;
    u64_to_epk(hash * EPK_SPACE / (1u64 << 32))
}

impl InMemoryContainer {
    /// Container with `partition_count` equal ranges (at least one)
    pub fn new(partition_count: usize) -> Self {
        let count = partition_count.max(1) as u64;
        let partitions = (0..count)
            .map(|i| {
                let min = if i == 0 {
                    MIN_EPK.to_string()
                } else {
                    u64_to_epk(i * EPK_SPACE / count)
                };
                let max = if i + 1 == count {
                    MAX_EPK.to_string()
                } else {
                    u64_to_epk((i + 1) * EPK_SPACE / count)
                };
                Partition {
                    range: FeedRange::new(min, max),
                    documents: Vec::new(),
                }
            })
            .collect();
        Self {
            state: Mutex::new(ContainerState {
                partitions,
                next_document: 1,
                faults: Vec::new(),
            }),
            behavior: QueryBehavior::default(),
            routes: Vec::new(),
            query_calls: AtomicU64::new(0),
            refresh_calls: AtomicU64::new(0),
        }
    }

    pub fn with_behavior(mut self, behavior: QueryBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Shape rows with `behavior` for queries mentioning `marker`
    pub fn with_behavior_for(mut self, marker: impl Into<String>, behavior: QueryBehavior) -> Self {
        self.routes.push((marker.into(), behavior));
        self
    }

    fn behavior_for(&self, query: &SqlQuerySpec) -> &QueryBehavior {
        self.routes
            .iter()
            .find(|(marker, _)| query.query_text.contains(marker.as_str()))
            .map(|(_, behavior)| behavior)
            .unwrap_or(&self.behavior)
    }

    /// Store a document; returns its rid
    pub fn insert(&self, partition_key: &str, body: Value) -> String {
        let epk = effective_partition_key(partition_key);
        let mut state = lock(&self.state);
        let rid = ResourceId::new(1, 1, state.next_document).encode();
        state.next_document += 1;

        let mut body = body;
        if let Value::Object(map) = &mut body {
            map.insert("_rid".to_string(), Value::String(rid.clone()));
        }
        let document = StoredDocument {
            rid: rid.clone(),
            epk,
            body,
        };
        if let Some(partition) = state
            .partitions
            .iter_mut()
            .find(|p| p.range.contains_key(&document.epk))
        {
            partition.documents.push(document);
        }
        rid
    }

    /// Current ranges, sorted
    pub fn ranges(&self) -> Vec<FeedRange> {
        lock(&self.state)
            .partitions
            .iter()
            .map(|p| p.range.clone())
            .collect()
    }

    pub fn document_count(&self) -> usize {
        lock(&self.state)
            .partitions
            .iter()
            .map(|p| p.documents.len())
            .sum()
    }

    /// Backend fetches served or failed so far
    pub fn query_calls(&self) -> u64 {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> u64 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Split `range` at its midpoint
    pub fn split(&self, range: &FeedRange) -> QueryResult<(FeedRange, FeedRange)> {
        let mut state = lock(&self.state);
        let index = state
            .partitions
            .iter()
            .position(|p| &p.range == range)
            .ok_or_else(|| QueryError::invalid_argument(format!("no partition {}", range)))?;

        let low = epk_to_u64(&range.min);
        let high = epk_to_u64(&range.max);
        let middle = low + (high - low) / 2;
        if middle <= low {
            return Err(QueryError::invalid_argument(format!(
                "partition {} is too narrow to split",
                range
            )));
        }
        let middle = u64_to_epk(middle);

        let parent = state.partitions.remove(index);
        let left_range = FeedRange::new(parent.range.min.clone(), middle.clone());
        let right_range = FeedRange::new(middle, parent.range.max.clone());
        let (left_docs, right_docs): (Vec<_>, Vec<_>) = parent
            .documents
            .into_iter()
            .partition(|doc| left_range.contains_key(&doc.epk));

        state.partitions.insert(
            index,
            Partition {
                range: right_range.clone(),
                documents: right_docs,
            },
        );
        state.partitions.insert(
            index,
            Partition {
                range: left_range.clone(),
                documents: left_docs,
            },
        );
        Ok((left_range, right_range))
    }

    /// Merge two adjacent partitions
    pub fn merge(&self, left: &FeedRange, right: &FeedRange) -> QueryResult<FeedRange> {
        let mut state = lock(&self.state);
        let index = state
            .partitions
            .iter()
            .position(|p| &p.range == left)
            .ok_or_else(|| QueryError::invalid_argument(format!("no partition {}", left)))?;
        let adjacent = state
            .partitions
            .get(index + 1)
            .map(|p| &p.range == right)
            .unwrap_or(false);
        if !adjacent {
            return Err(QueryError::invalid_argument(format!(
                "{} and {} are not adjacent partitions",
                left, right
            )));
        }

        let right_partition = state.partitions.remove(index + 1);
        let partition = &mut state.partitions[index];
        partition.range = FeedRange::new(left.min.clone(), right.max.clone());
        partition.documents.extend(right_partition.documents);
        partition
            .documents
            .sort_by(|a, b| compare_rids(&a.rid, &b.rid));
        Ok(partition.range.clone())
    }

    /// Fail the next fetch (on any range) once `after_calls` more fetches ran
    pub fn inject_failure(&self, after_calls: u64, error: QueryError) {
        let after = self.query_calls() + after_calls;
        lock(&self.state).faults.push(Fault {
            range: None,
            after_calls: after,
            error,
        });
    }

    /// Fail the next fetch against `range`
    pub fn inject_failure_for(&self, range: FeedRange, error: QueryError) {
        lock(&self.state).faults.push(Fault {
            range: Some(range),
            after_calls: 0,
            error,
        });
    }

    fn take_fault(state: &mut ContainerState, range: &FeedRange, call: u64) -> Option<QueryError> {
        let index = state.faults.iter().position(|fault| {
            call >= fault.after_calls
                && fault.range.as_ref().map(|r| r == range).unwrap_or(true)
        })?;
        Some(state.faults.remove(index).error)
    }

    fn execute(
        &self,
        query: &SqlQuerySpec,
        feed_range_state: &FeedRangeState,
        options: &QueryPaginationOptions,
    ) -> QueryResult<QueryPage> {
        let call = self.query_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = lock(&self.state);
        let range = &feed_range_state.feed_range;
        if let Some(error) = Self::take_fault(&mut state, range, call) {
            return Err(error);
        }
        let partition = state
            .partitions
            .iter()
            .find(|p| &p.range == range)
            .ok_or_else(|| QueryError::PartitionGone {
                range: range.clone(),
            })?;

        let page_size = options.page_size_hint.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let continuation = feed_range_state.state.as_ref().map(|s| s.value().clone());
        let behavior = self.behavior_for(query);
        if behavior.order_by.is_empty() {
            self.passthrough_page(behavior, &partition.documents, continuation, page_size)
        } else {
            self.order_by_page(behavior, &partition.documents, continuation, page_size)
        }
    }

    fn passthrough_page(
        &self,
        behavior: &QueryBehavior,
        documents: &[StoredDocument],
        continuation: Option<Value>,
        page_size: usize,
    ) -> QueryResult<QueryPage> {
        let after = match &continuation {
            Some(value) => Some(
                value
                    .get("rid")
                    .and_then(Value::as_str)
                    .ok_or_else(|| QueryError::Backend {
                        status_code: 400,
                        message: format!("invalid continuation {}", value),
                    })?
                    .to_string(),
            ),
            None => None,
        };
        let remaining: Vec<&StoredDocument> = documents
            .iter()
            .filter(|doc| match &after {
                Some(rid) => compare_rids(&doc.rid, rid) == CmpOrdering::Greater,
                None => true,
            })
            .collect();

        let taken = &remaining[..remaining.len().min(page_size)];
        let state = if remaining.len() > taken.len() {
            taken
                .last()
                .map(|doc| QueryState::new(json!({ "rid": doc.rid })))
        } else {
            None
        };
        let rows = taken.iter().map(|doc| &doc.body).collect::<Vec<_>>();
        Ok(self.build_page(behavior, rows, taken.len(), state))
    }

    fn order_by_page(
        &self,
        behavior: &QueryBehavior,
        documents: &[StoredDocument],
        continuation: Option<Value>,
        page_size: usize,
    ) -> QueryResult<QueryPage> {
        let orders = behavior.orders();
        let mut rows: Vec<OrderByRow> = documents
            .iter()
            .map(|doc| OrderByRow {
                rid: doc.rid.clone(),
                order_by_items: behavior.sort_items(&doc.body),
                payload: Some(doc.body.clone()),
            })
            .collect();
        rows.sort_by(|a, b| {
            compare_positions(&a.order_by_items, &a.rid, &b.order_by_items, &b.rid, &orders)
        });

        if let Some(value) = continuation {
            let position: OrderByRow =
                serde_json::from_value(value.clone()).map_err(|_| QueryError::Backend {
                    status_code: 400,
                    message: format!("invalid continuation {}", value),
                })?;
            rows.retain(|row| {
                compare_positions(
                    &row.order_by_items,
                    &row.rid,
                    &position.order_by_items,
                    &position.rid,
                    &orders,
                ) == CmpOrdering::Greater
            });
        }

        let more = rows.len() > page_size;
        rows.truncate(page_size);
        let state = if more {
            rows.last().map(|row| {
                QueryState::new(json!({
                    "_rid": row.rid,
                    "orderByItems": row.order_by_items,
                }))
            })
        } else {
            None
        };

        let raw = rows.len();
        let projected: Vec<Value> = rows
            .into_iter()
            .filter_map(|mut row| {
                let body = row.payload.take()?;
                let payload = match &behavior.projection {
                    Some(projection) => projection(&body)?,
                    None => body,
                };
                row.payload = Some(payload);
                Some(row.to_document())
            })
            .collect();
        let documents = match &behavior.page_reducer {
            Some(reducer) => reducer(projected),
            None => projected,
        };
        Ok(self.page_from_rows(documents, raw, state))
    }

    fn build_page(
        &self,
        behavior: &QueryBehavior,
        bodies: Vec<&Value>,
        raw: usize,
        state: Option<QueryState>,
    ) -> QueryPage {
        let projected: Vec<Value> = bodies
            .into_iter()
            .filter_map(|body| match &behavior.projection {
                Some(projection) => projection(body),
                None => Some(body.clone()),
            })
            .collect();
        let documents = match &behavior.page_reducer {
            Some(reducer) => reducer(projected),
            None => projected,
        };
        self.page_from_rows(documents, raw, state)
    }

    fn page_from_rows(&self, documents: Vec<Value>, raw: usize, state: Option<QueryState>) -> QueryPage {
        let charge = BASE_CHARGE + CHARGE_PER_DOCUMENT * raw as f64;
        let mut page = QueryPage::new(documents, charge, new_activity_id(), state);
        page.response_length_in_bytes = page
            .documents
            .iter()
            .map(|doc| doc.to_string().len() as u64)
            .sum();
        page
    }
}

impl QueryDataSource for InMemoryContainer {
    fn monadic_query<'a>(
        &'a self,
        query: &'a SqlQuerySpec,
        feed_range_state: &'a FeedRangeState,
        options: &'a QueryPaginationOptions,
        _trace: &'a Trace,
        cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<QueryPage>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            if cancellation.is_cancelled() {
                return Err(QueryError::Cancelled);
            }
            self.execute(query, feed_range_state, options)
        })
    }
}

impl FeedRangeProvider for InMemoryContainer {
    fn get_feed_ranges<'a>(
        &'a self,
        _trace: &'a Trace,
        _cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<Vec<FeedRange>>> {
        Box::pin(async move { Ok(self.ranges()) })
    }

    fn get_child_ranges<'a>(
        &'a self,
        range: &'a FeedRange,
        _trace: &'a Trace,
        _cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<Vec<FeedRange>>> {
        Box::pin(async move {
            Ok(self
                .ranges()
                .into_iter()
                .filter(|candidate| candidate.overlaps(range))
                .collect())
        })
    }

    fn refresh_provider<'a>(
        &'a self,
        _trace: &'a Trace,
        _cancellation: &'a CancellationToken,
    ) -> BoxFuture<'a, QueryResult<()>> {
        Box::pin(async move {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}
