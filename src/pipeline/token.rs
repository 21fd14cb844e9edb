//! Continuation tokens
//!
//! One closed union with a variant per stage kind. A stage's page state is
//! the JSON form of its token; wrapper stages nest their inner stage's
//! token under `source`. The string handed to callers is an unpadded
//! URL-safe base64 of a versioned envelope.
//!
//! Decoding is structural: unknown fields are ignored, an unknown kind or a
//! kind that does not match the stage being built is a
//! `MalformedContinuationToken`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::aggregate::AggregateContinuationToken;
use super::dcount::DCountContinuationToken;
use super::distinct::DistinctContinuationToken;
use super::group_by::GroupByContinuationToken;
use super::hybrid_search::HybridSearchContinuationToken;
use super::order_by::{NonStreamingOrderByContinuationToken, OrderByContinuationToken};
use super::parallel::ParallelContinuationToken;
use super::skip::SkipContinuationToken;
use super::take::TakeContinuationToken;
use crate::errors::{QueryError, QueryResult};
use crate::pagination::QueryState;

/// Envelope version written by this build
pub const TOKEN_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ContinuationToken {
    Parallel(ParallelContinuationToken),
    OrderBy(OrderByContinuationToken),
    NonStreamingOrderBy(NonStreamingOrderByContinuationToken),
    HybridSearch(HybridSearchContinuationToken),
    Aggregate(AggregateContinuationToken),
    GroupBy(GroupByContinuationToken),
    Distinct(DistinctContinuationToken),
    DCount(DCountContinuationToken),
    Skip(SkipContinuationToken),
    Take(TakeContinuationToken),
}

#[derive(Serialize, Deserialize)]
struct TokenEnvelope {
    version: u32,
    token: ContinuationToken,
}

impl ContinuationToken {
    pub fn kind(&self) -> &'static str {
        match self {
            ContinuationToken::Parallel(_) => "parallel",
            ContinuationToken::OrderBy(_) => "orderBy",
            ContinuationToken::NonStreamingOrderBy(_) => "nonStreamingOrderBy",
            ContinuationToken::HybridSearch(_) => "hybridSearch",
            ContinuationToken::Aggregate(_) => "aggregate",
            ContinuationToken::GroupBy(_) => "groupBy",
            ContinuationToken::Distinct(_) => "distinct",
            ContinuationToken::DCount(_) => "dCount",
            ContinuationToken::Skip(_) => "skip",
            ContinuationToken::Take(_) => "take",
        }
    }

    /// Page state carrying this token
    pub fn to_state(&self) -> QueryState {
        QueryState(serde_json::to_value(self).unwrap_or(Value::Null))
    }

    /// Read a token back from a stage's page state
    pub fn from_state(state: &QueryState) -> QueryResult<Self> {
        serde_json::from_value(state.value().clone())
            .map_err(|e| QueryError::malformed(format!("continuation token: {}", e)))
    }

    /// Opaque caller-facing form
    pub fn encode(&self) -> String {
        let envelope = TokenEnvelope {
            version: TOKEN_VERSION,
            token: self.clone(),
        };
        let json = serde_json::to_vec(&envelope).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(encoded: &str) -> QueryResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| QueryError::malformed(format!("not base64: {}", e)))?;
        let raw: Value = serde_json::from_slice(&bytes)
            .map_err(|e| QueryError::malformed(format!("not JSON: {}", e)))?;
        let version = raw.get("version").and_then(Value::as_u64);
        if version != Some(TOKEN_VERSION as u64) {
            return Err(QueryError::malformed(format!(
                "unsupported token version {:?}",
                version
            )));
        }
        let envelope: TokenEnvelope = serde_json::from_value(raw)
            .map_err(|e| QueryError::malformed(format!("continuation token: {}", e)))?;
        Ok(envelope.token)
    }

    /// Token nested under a wrapper
    pub(crate) fn boxed(self) -> Box<ContinuationToken> {
        Box::new(self)
    }
}

/// Error for a token whose kind does not belong at this position
pub(crate) fn unexpected_token(expected: &str, found: &ContinuationToken) -> QueryError {
    QueryError::malformed(format!(
        "expected a {} continuation, found {}",
        expected,
        found.kind()
    ))
}

/// Decode the token an inner stage left in its page state
pub(crate) fn source_token(state: Option<&QueryState>) -> QueryResult<Option<Box<ContinuationToken>>> {
    state
        .map(|state| ContinuationToken::from_state(state).map(ContinuationToken::boxed))
        .transpose()
}
