//! Sort-key comparison
//!
//! Values of different types order by type:
//! undefined < null < bool < number < string < array < object.
//! Arrays and objects compare equal to each other within their type.

use std::cmp::Ordering;

use serde_json::Value;

use super::row::{OrderByItem, OrderByRow};
use crate::pagination::compare_rids;
use crate::query::SortOrder;

fn type_order(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Compare two sort keys; `None` is undefined
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let by_type = type_order(a).cmp(&type_order(b));
    if by_type != Ordering::Equal {
        return by_type;
    }
    match (a, b) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => {
                let a = a.as_f64().unwrap_or(0.0);
                let b = b.as_f64().unwrap_or(0.0);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
        },
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

fn directed(ordering: Ordering, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Ascending => ordering,
        SortOrder::Descending => ordering.reverse(),
    }
}

/// Compare key tuples column by column, honoring each column's direction
pub fn compare_items(left: &[OrderByItem], right: &[OrderByItem], orders: &[SortOrder]) -> Ordering {
    for ((l, r), order) in left.iter().zip(right.iter()).zip(orders.iter()) {
        let ordering = directed(compare_values(l.item.as_ref(), r.item.as_ref()), *order);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Compare positions in the global order: keys, then rid in the direction
/// of the leading column.
pub fn compare_positions(
    left_items: &[OrderByItem],
    left_rid: &str,
    right_items: &[OrderByItem],
    right_rid: &str,
    orders: &[SortOrder],
) -> Ordering {
    compare_items(left_items, right_items, orders).then_with(|| {
        let leading = orders.first().copied().unwrap_or(SortOrder::Ascending);
        directed(compare_rids(left_rid, right_rid), leading)
    })
}

pub fn compare_rows(left: &OrderByRow, right: &OrderByRow, orders: &[SortOrder]) -> Ordering {
    compare_positions(
        &left.order_by_items,
        &left.rid,
        &right.order_by_items,
        &right.rid,
        orders,
    )
}
