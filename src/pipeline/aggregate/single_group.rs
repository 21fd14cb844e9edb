//! Aggregation state for one group (or the whole result set)
//!
//! Row shapes produced by the rewritten query:
//! - `SELECT VALUE agg(...)`: `{"item": partial}`
//! - select list: `{"alias": {"item": partial}, "scalar": value}`, where
//!   aliases without an operator hold a plain projected value

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::aggregators::Aggregator;
use crate::errors::{QueryError, QueryResult};
use crate::pipeline::order_by::deserialize_present;
use crate::query::AggregateOperator;

/// One output column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AggregateValue {
    Aggregate { aggregator: Aggregator },
    /// Non-aggregated projection; the first value seen wins
    Scalar {
        #[serde(
            default,
            deserialize_with = "deserialize_present",
            skip_serializing_if = "Option::is_none"
        )]
        value: Option<Value>,
        initialized: bool,
    },
}

impl AggregateValue {
    pub fn new(operator: Option<AggregateOperator>) -> Self {
        match operator {
            Some(operator) => AggregateValue::Aggregate {
                aggregator: Aggregator::new(operator),
            },
            None => AggregateValue::Scalar {
                value: None,
                initialized: false,
            },
        }
    }

    fn accepts(&self, operator: Option<AggregateOperator>) -> bool {
        match (self, operator) {
            (AggregateValue::Aggregate { aggregator }, Some(operator)) => aggregator.accepts(operator),
            (AggregateValue::Scalar { .. }, None) => true,
            _ => false,
        }
    }

    pub fn add(&mut self, value: Option<&Value>) {
        match self {
            AggregateValue::Aggregate { aggregator } => {
                aggregator.add(value.and_then(|wrapped| wrapped.get("item")))
            }
            AggregateValue::Scalar {
                value: current,
                initialized,
            } => {
                if !*initialized {
                    *current = value.cloned();
                    *initialized = true;
                }
            }
        }
    }

    pub fn result(&self) -> Option<Value> {
        match self {
            AggregateValue::Aggregate { aggregator } => aggregator.result(),
            AggregateValue::Scalar { value, .. } => value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "camelCase")]
pub enum SingleGroupAggregator {
    SelectValue {
        value: AggregateValue,
    },
    SelectList {
        /// Output order of the columns
        aliases: Vec<String>,
        values: BTreeMap<String, AggregateValue>,
    },
}

impl SingleGroupAggregator {
    /// Fresh state for a query shape, or the persisted `state` after it is
    /// checked against that shape.
    pub fn create(
        aggregates: &[AggregateOperator],
        alias_to_aggregate: &BTreeMap<String, Option<AggregateOperator>>,
        ordered_aliases: &[String],
        has_select_value: bool,
        state: Option<&Value>,
    ) -> QueryResult<Self> {
        let shape = if has_select_value {
            SingleGroupAggregator::SelectValue {
                value: AggregateValue::new(aggregates.first().copied()),
            }
        } else {
            let values = alias_to_aggregate
                .iter()
                .map(|(alias, operator)| (alias.clone(), AggregateValue::new(*operator)))
                .collect();
            let mut aliases: Vec<String> = ordered_aliases
                .iter()
                .filter(|alias| alias_to_aggregate.contains_key(*alias))
                .cloned()
                .collect();
            for alias in alias_to_aggregate.keys() {
                if !aliases.contains(alias) {
                    aliases.push(alias.clone());
                }
            }
            SingleGroupAggregator::SelectList { aliases, values }
        };

        let state = match state {
            Some(state) => state,
            None => return Ok(shape),
        };
        let restored: SingleGroupAggregator = serde_json::from_value(state.clone())
            .map_err(|e| QueryError::malformed(format!("aggregate state: {}", e)))?;
        if !restored.matches(aggregates, alias_to_aggregate, &shape) {
            return Err(QueryError::malformed(
                "aggregate state does not match the query's aggregates",
            ));
        }
        Ok(restored)
    }

    fn matches(
        &self,
        aggregates: &[AggregateOperator],
        alias_to_aggregate: &BTreeMap<String, Option<AggregateOperator>>,
        shape: &SingleGroupAggregator,
    ) -> bool {
        match (self, shape) {
            (SingleGroupAggregator::SelectValue { value }, SingleGroupAggregator::SelectValue { .. }) => {
                value.accepts(aggregates.first().copied())
            }
            (
                SingleGroupAggregator::SelectList { aliases, values },
                SingleGroupAggregator::SelectList {
                    aliases: expected, ..
                },
            ) => {
                aliases == expected
                    && values.len() == alias_to_aggregate.len()
                    && alias_to_aggregate.iter().all(|(alias, operator)| {
                        values
                            .get(alias)
                            .map(|value| value.accepts(*operator))
                            .unwrap_or(false)
                    })
            }
            _ => false,
        }
    }

    /// Fold one backend row
    pub fn add_values(&mut self, row: &Value) -> QueryResult<()> {
        match self {
            SingleGroupAggregator::SelectValue { value } => {
                value.add(Some(row));
                Ok(())
            }
            SingleGroupAggregator::SelectList { values, .. } => {
                let payload = row.as_object().ok_or_else(|| {
                    QueryError::internal(format!("aggregate row is not an object: {}", row))
                })?;
                for (alias, value) in values.iter_mut() {
                    value.add(payload.get(alias));
                }
                Ok(())
            }
        }
    }

    /// Result document; `None` when a SELECT VALUE result is undefined.
    /// Undefined select-list columns are left out of the object.
    pub fn result(&self) -> Option<Value> {
        match self {
            SingleGroupAggregator::SelectValue { value } => value.result(),
            SingleGroupAggregator::SelectList { aliases, values } => {
                let mut object = Map::new();
                for alias in aliases {
                    if let Some(result) = values.get(alias).and_then(AggregateValue::result) {
                        object.insert(alias.clone(), result);
                    }
                }
                Some(Value::Object(object))
            }
        }
    }

    pub fn to_state(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn select_list() -> SingleGroupAggregator {
        let mut aliases = BTreeMap::new();
        aliases.insert("total".to_string(), Some(AggregateOperator::Sum));
        aliases.insert("n".to_string(), Some(AggregateOperator::Count));
        aliases.insert("key".to_string(), None);
        SingleGroupAggregator::create(
            &[AggregateOperator::Sum, AggregateOperator::Count],
            &aliases,
            &["key".to_string(), "total".to_string(), "n".to_string()],
            false,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_select_list_omits_undefined_columns() {
        let group = select_list();
        assert_eq!(group.result(), Some(json!({"n": 0})));
    }

    #[test]
    fn test_select_list_folds_rows_in_alias_order() {
        let mut group = select_list();
        group
            .add_values(&json!({"key": "a", "total": {"item": 3}, "n": {"item": 2}}))
            .unwrap();
        group
            .add_values(&json!({"key": "ignored", "total": {"item": 4}, "n": {"item": 1}}))
            .unwrap();
        let result = group.result().unwrap();
        let keys: Vec<&String> = result.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["key", "total", "n"]);
        assert_eq!(result, json!({"key": "a", "total": 7, "n": 3}));
        assert!(group.add_values(&json!(5)).is_err());
    }

    #[test]
    fn test_select_value_sum_over_nothing_is_absent() {
        let group = SingleGroupAggregator::create(
            &[AggregateOperator::Sum],
            &BTreeMap::new(),
            &[],
            true,
            None,
        )
        .unwrap();
        assert_eq!(group.result(), None);
    }

    #[test]
    fn test_state_must_match_query() {
        let mut group = select_list();
        group
            .add_values(&json!({"key": "a", "total": {"item": 1}, "n": {"item": 1}}))
            .unwrap();
        let state = group.to_state();

        let mut aliases = BTreeMap::new();
        aliases.insert("total".to_string(), Some(AggregateOperator::Sum));
        aliases.insert("n".to_string(), Some(AggregateOperator::Count));
        aliases.insert("key".to_string(), None);
        let order = ["key".to_string(), "total".to_string(), "n".to_string()];
        let restored =
            SingleGroupAggregator::create(&[], &aliases, &order, false, Some(&state)).unwrap();
        assert_eq!(restored, group);

        aliases.insert("n".to_string(), Some(AggregateOperator::Max));
        assert!(matches!(
            SingleGroupAggregator::create(&[], &aliases, &order, false, Some(&state)),
            Err(QueryError::MalformedContinuationToken(_))
        ));
    }
}
