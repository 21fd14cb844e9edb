//! Per-operator accumulators
//!
//! Each backend row carries one partial result per aggregate (a partition's
//! local SUM, COUNT, `{sum, count}` for AVG, ...). An accumulator folds the
//! partials and is its own persisted state.
//!
//! `None` inputs are undefined and skipped. A defined partial of the wrong
//! type poisons the accumulator and its result becomes undefined.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::pipeline::order_by::{compare_values, deserialize_present};
use crate::query::AggregateOperator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Aggregator {
    /// COUNT and COUNTIF both sum partition counts
    Count { count: u64 },
    Sum {
        #[serde(default)]
        sum: Option<Number>,
        #[serde(default)]
        invalid: bool,
    },
    Average {
        sum: f64,
        count: u64,
        #[serde(default)]
        invalid: bool,
    },
    Min {
        #[serde(
            default,
            deserialize_with = "deserialize_present",
            skip_serializing_if = "Option::is_none"
        )]
        value: Option<Value>,
        #[serde(default)]
        invalid: bool,
    },
    Max {
        #[serde(
            default,
            deserialize_with = "deserialize_present",
            skip_serializing_if = "Option::is_none"
        )]
        value: Option<Value>,
        #[serde(default)]
        invalid: bool,
    },
    MakeList { items: Vec<Value> },
    MakeSet { items: Vec<Value> },
}

fn add_numbers(left: &Number, right: &Number) -> Option<Number> {
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        if let Some(sum) = l.checked_add(r) {
            return Some(Number::from(sum));
        }
    }
    Number::from_f64(left.as_f64()? + right.as_f64()?)
}

/// Unwrap a MIN/MAX partial: a raw value or `{"min"|"max": v, "count": n}`
fn min_max_partial<'a>(partial: &'a Value, key: &str) -> Option<Option<&'a Value>> {
    match partial {
        Value::Object(map) if map.contains_key("count") => {
            let count = map.get("count").and_then(Value::as_u64).unwrap_or(0);
            if count == 0 {
                Some(None)
            } else {
                Some(map.get(key))
            }
        }
        Value::Object(_) | Value::Array(_) => None,
        other => Some(Some(other)),
    }
}

fn fold_extreme(current: &mut Option<Value>, invalid: &mut bool, partial: &Value, key: &str, keep: Ordering) {
    let candidate = match min_max_partial(partial, key) {
        Some(Some(candidate)) => candidate,
        Some(None) => return,
        None => {
            *invalid = true;
            return;
        }
    };
    if matches!(candidate, Value::Object(_) | Value::Array(_)) {
        *invalid = true;
        return;
    }
    let replace = match current {
        None => true,
        Some(existing) => compare_values(Some(candidate), Some(existing)) == keep,
    };
    if replace {
        *current = Some(candidate.clone());
    }
}

impl Aggregator {
    pub fn new(operator: AggregateOperator) -> Self {
        match operator {
            AggregateOperator::Count | AggregateOperator::CountIf => Aggregator::Count { count: 0 },
            AggregateOperator::Sum => Aggregator::Sum {
                sum: None,
                invalid: false,
            },
            AggregateOperator::Average => Aggregator::Average {
                sum: 0.0,
                count: 0,
                invalid: false,
            },
            AggregateOperator::Min => Aggregator::Min {
                value: None,
                invalid: false,
            },
            AggregateOperator::Max => Aggregator::Max {
                value: None,
                invalid: false,
            },
            AggregateOperator::MakeList => Aggregator::MakeList { items: Vec::new() },
            AggregateOperator::MakeSet => Aggregator::MakeSet { items: Vec::new() },
        }
    }

    /// True when persisted state belongs to `operator`
    pub fn accepts(&self, operator: AggregateOperator) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(&Aggregator::new(operator))
    }

    pub fn add(&mut self, partial: Option<&Value>) {
        let partial = match partial {
            Some(partial) => partial,
            None => return,
        };
        match self {
            Aggregator::Count { count } => match partial.as_u64() {
                Some(n) => *count += n,
                None => {
                    if let Some(n) = partial.as_f64() {
                        *count += n.max(0.0) as u64;
                    }
                }
            },
            Aggregator::Sum { sum, invalid } => match partial {
                Value::Number(n) => {
                    *sum = match sum.as_ref() {
                        None => Some(n.clone()),
                        Some(existing) => match add_numbers(existing, n) {
                            Some(total) => Some(total),
                            None => {
                                *invalid = true;
                                None
                            }
                        },
                    }
                }
                _ => *invalid = true,
            },
            Aggregator::Average { sum, count, invalid } => {
                let partial_count = partial.get("count").and_then(Value::as_u64);
                match (partial.get("sum"), partial_count) {
                    (_, Some(0)) => {}
                    (Some(Value::Number(partial_sum)), Some(partial_count)) => {
                        *sum += partial_sum.as_f64().unwrap_or(0.0);
                        *count += partial_count;
                    }
                    _ => *invalid = true,
                }
            }
            Aggregator::Min { value, invalid } => {
                fold_extreme(value, invalid, partial, "min", Ordering::Less)
            }
            Aggregator::Max { value, invalid } => {
                fold_extreme(value, invalid, partial, "max", Ordering::Greater)
            }
            Aggregator::MakeList { items } => match partial {
                Value::Array(values) => items.extend(values.iter().cloned()),
                other => items.push(other.clone()),
            },
            Aggregator::MakeSet { items } => {
                let values = match partial {
                    Value::Array(values) => values.clone(),
                    other => vec![other.clone()],
                };
                for value in values {
                    if !items.contains(&value) {
                        items.push(value);
                    }
                }
            }
        }
    }

    /// Final value; `None` is undefined
    pub fn result(&self) -> Option<Value> {
        match self {
            Aggregator::Count { count } => Some(Value::from(*count)),
            Aggregator::Sum { sum, invalid } => {
                if *invalid {
                    None
                } else {
                    sum.clone().map(Value::Number)
                }
            }
            Aggregator::Average { sum, count, invalid } => {
                if *invalid || *count == 0 {
                    None
                } else {
                    Number::from_f64(*sum / *count as f64).map(Value::Number)
                }
            }
            Aggregator::Min { value, invalid } | Aggregator::Max { value, invalid } => {
                if *invalid {
                    None
                } else {
                    value.clone()
                }
            }
            Aggregator::MakeList { items } | Aggregator::MakeSet { items } => {
                Some(Value::Array(items.clone()))
            }
        }
    }
}
