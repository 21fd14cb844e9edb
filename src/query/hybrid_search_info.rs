//! Hybrid search plan
//!
//! A hybrid search runs several ranked component queries (full-text and
//! vector scoring) and fuses their results by reciprocal rank. Full-text
//! scoring may need corpus-wide statistics first; those are gathered by a
//! separate query and substituted into each component's text.

use serde::{Deserialize, Serialize};

use super::query_info::QueryInfo;
use crate::errors::{QueryError, QueryResult};

pub const TOTAL_DOCUMENT_COUNT_PLACEHOLDER: &str = "{documentdb-formattablehybridsearchquery-totaldocumentcount}";

fn total_word_count_placeholder(component: usize) -> String {
    format!("{{documentdb-formattablehybridsearchquery-totalwordcount-{}}}", component)
}

fn hit_counts_array_placeholder(component: usize) -> String {
    format!("{{documentdb-formattablehybridsearchquery-hitcountsarray-{}}}", component)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HybridSearchQueryInfo {
    /// Query returning one statistics row per range page
    pub global_statistics_query: String,
    /// One non-streaming order-by plan per ranking component
    pub component_query_infos: Vec<QueryInfo>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub requires_global_statistics: bool,
}

impl HybridSearchQueryInfo {
    pub fn validate(&self) -> QueryResult<()> {
        if self.component_query_infos.is_empty() {
            return Err(QueryError::invalid_argument("hybrid search needs at least one component query"));
        }
        if self.requires_global_statistics && self.global_statistics_query.is_empty() {
            return Err(QueryError::invalid_argument(
                "hybrid search requires global statistics but has no statistics query",
            ));
        }
        for (index, component) in self.component_query_infos.iter().enumerate() {
            if !component.has_order_by() || !component.has_non_streaming_order_by {
                return Err(QueryError::invalid_argument(format!(
                    "hybrid search component {} is not a non-streaming order by",
                    index
                )));
            }
            if component.hybrid_search_query_info.is_some() {
                return Err(QueryError::invalid_argument(format!(
                    "hybrid search component {} is itself a hybrid search",
                    index
                )));
            }
            component.validate()?;
        }
        Ok(())
    }
}

/// Term statistics for one full-text scoring function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullTextStatistics {
    pub total_word_count: u64,
    /// Documents containing each search term
    pub hit_counts: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalFullTextSearchStatistics {
    pub document_count: u64,
    pub full_text_statistics: Vec<FullTextStatistics>,
}

impl GlobalFullTextSearchStatistics {
    /// Fold another range's statistics into these
    pub fn add(&mut self, other: &GlobalFullTextSearchStatistics) -> QueryResult<()> {
        if other.full_text_statistics.len() != self.full_text_statistics.len() {
            return Err(QueryError::internal(format!(
                "statistics rows disagree on scoring functions: {} vs {}",
                self.full_text_statistics.len(),
                other.full_text_statistics.len()
            )));
        }
        self.document_count += other.document_count;
        for (mine, theirs) in self.full_text_statistics.iter_mut().zip(&other.full_text_statistics) {
            if mine.hit_counts.len() != theirs.hit_counts.len() {
                return Err(QueryError::internal(format!(
                    "statistics rows disagree on term count: {} vs {}",
                    mine.hit_counts.len(),
                    theirs.hit_counts.len()
                )));
            }
            mine.total_word_count += theirs.total_word_count;
            for (count, other_count) in mine.hit_counts.iter_mut().zip(&theirs.hit_counts) {
                *count += other_count;
            }
        }
        Ok(())
    }

    /// Substitute the statistics placeholders in a component's text
    ///
    /// Statistics entries are assigned in order to the components whose
    /// text actually mentions a word-count placeholder; components scored
    /// without full-text statistics consume none.
    pub fn format_component_text(&self, text: &str, component_count: usize) -> QueryResult<String> {
        let mut text = text.replace(TOTAL_DOCUMENT_COUNT_PLACEHOLDER, &self.document_count.to_string());
        let mut next = 0;
        for component in 0..component_count {
            let word_count = total_word_count_placeholder(component);
            if !text.contains(&word_count) {
                continue;
            }
            let statistics = self.full_text_statistics.get(next).ok_or_else(|| {
                QueryError::internal(format!("no full-text statistics for component {}", component))
            })?;
            text = text.replace(&word_count, &statistics.total_word_count.to_string());
            let hit_counts: Vec<String> = statistics.hit_counts.iter().map(u64::to_string).collect();
            text = text.replace(
                &hit_counts_array_placeholder(component),
                &format!("[{}]", hit_counts.join(",")),
            );
            next += 1;
        }
        Ok(text)
    }

    /// Component plan with its query text and sort expressions filled in
    pub fn rewrite_component(&self, component: &QueryInfo, component_count: usize) -> QueryResult<QueryInfo> {
        let order_by_expressions = component
            .order_by_expressions
            .iter()
            .map(|expression| self.format_component_text(expression, component_count))
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(QueryInfo {
            order_by_expressions,
            rewritten_query: self.format_component_text(&component.rewritten_query, component_count)?,
            ..component.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SortOrder;

    fn statistics() -> GlobalFullTextSearchStatistics {
        GlobalFullTextSearchStatistics {
            document_count: 10,
            full_text_statistics: vec![FullTextStatistics {
                total_word_count: 120,
                hit_counts: vec![3, 7],
            }],
        }
    }

    #[test]
    fn test_add_sums_every_counter() {
        let mut total = statistics();
        total.add(&statistics()).unwrap();
        assert_eq!(total.document_count, 20);
        assert_eq!(total.full_text_statistics[0].total_word_count, 240);
        assert_eq!(total.full_text_statistics[0].hit_counts, vec![6, 14]);

        let mismatched = GlobalFullTextSearchStatistics {
            document_count: 1,
            full_text_statistics: vec![],
        };
        assert!(matches!(total.add(&mismatched), Err(QueryError::Internal(_))));
    }

    #[test]
    fn test_statistics_skip_components_without_placeholders() {
        // Component 0 is a vector score; component 1 takes the only entry.
        let text = "FullTextScore(c.text, {documentdb-formattablehybridsearchquery-totaldocumentcount}, \
                    {documentdb-formattablehybridsearchquery-totalwordcount-1}, \
                    {documentdb-formattablehybridsearchquery-hitcountsarray-1})";
        assert_eq!(
            statistics().format_component_text(text, 2).unwrap(),
            "FullTextScore(c.text, 10, 120, [3,7])"
        );
    }

    #[test]
    fn test_missing_statistics_entry_fails() {
        let text = "{documentdb-formattablehybridsearchquery-totalwordcount-0} \
                    {documentdb-formattablehybridsearchquery-totalwordcount-1}";
        assert!(matches!(
            statistics().format_component_text(text, 2),
            Err(QueryError::Internal(_))
        ));
    }

    #[test]
    fn test_components_must_be_non_streaming_order_by() {
        let streaming = QueryInfo {
            order_by: vec![SortOrder::Descending],
            order_by_expressions: vec!["c.score".into()],
            ..Default::default()
        };
        let info = HybridSearchQueryInfo {
            component_query_infos: vec![streaming.clone()],
            ..Default::default()
        };
        assert!(matches!(info.validate(), Err(QueryError::InvalidArgument(_))));

        let info = HybridSearchQueryInfo {
            component_query_infos: vec![QueryInfo {
                has_non_streaming_order_by: true,
                ..streaming
            }],
            ..Default::default()
        };
        assert!(info.validate().is_ok());
        assert!(matches!(
            HybridSearchQueryInfo::default().validate(),
            Err(QueryError::InvalidArgument(_))
        ));
    }
}
