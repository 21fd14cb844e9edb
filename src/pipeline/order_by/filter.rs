//! Resume filters for formattable order-by queries
//!
//! For sort columns `a, b` (ascending) resumed at `(1, "x")`:
//!
//! ```text
//! (c.a > 1) OR (c.a = 1 AND c.b >= "x")
//! ```
//!
//! The last column is inclusive; rows equal to the checkpoint are removed
//! client-side by rid and skip count.

use super::row::OrderByItem;
use crate::query::SortOrder;

/// Filter that keeps every row
pub const ALWAYS_TRUE: &str = "true";

fn literal(item: &OrderByItem) -> Option<String> {
    if !item.is_primitive() {
        return None;
    }
    item.item
        .as_ref()
        .and_then(|value| serde_json::to_string(value).ok())
}

fn operator(order: SortOrder, inclusive: bool) -> &'static str {
    match (order, inclusive) {
        (SortOrder::Ascending, false) => ">",
        (SortOrder::Ascending, true) => ">=",
        (SortOrder::Descending, false) => "<",
        (SortOrder::Descending, true) => "<=",
    }
}

/// WHERE-clause text selecting rows at or after `items`
///
/// Keys that cannot be written as literals (undefined, arrays, objects)
/// degrade the filter to `true`.
pub fn order_by_filter(expressions: &[String], orders: &[SortOrder], items: &[OrderByItem]) -> String {
    if expressions.is_empty() || expressions.len() != orders.len() || items.len() != orders.len() {
        return ALWAYS_TRUE.to_string();
    }
    let literals: Option<Vec<String>> = items.iter().map(literal).collect();
    let literals = match literals {
        Some(literals) => literals,
        None => return ALWAYS_TRUE.to_string(),
    };

    let last = expressions.len() - 1;
    let clauses: Vec<String> = (0..expressions.len())
        .map(|column| {
            let mut terms: Vec<String> = (0..column)
                .map(|earlier| format!("{} = {}", expressions[earlier], literals[earlier]))
                .collect();
            terms.push(format!(
                "{} {} {}",
                expressions[column],
                operator(orders[column], column == last),
                literals[column]
            ));
            format!("({})", terms.join(" AND "))
        })
        .collect();
    clauses.join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exprs(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_single_column_is_inclusive() {
        let filter = order_by_filter(
            &exprs(&["c.age"]),
            &[SortOrder::Descending],
            &[OrderByItem::new(json!(30))],
        );
        assert_eq!(filter, "(c.age <= 30)");
    }

    #[test]
    fn test_multi_column_expansion() {
        let filter = order_by_filter(
            &exprs(&["c.a", "c.b"]),
            &[SortOrder::Ascending, SortOrder::Descending],
            &[OrderByItem::new(json!(1)), OrderByItem::new(json!("x"))],
        );
        assert_eq!(filter, "(c.a > 1) OR (c.a = 1 AND c.b <= \"x\")");
    }

    #[test]
    fn test_non_literal_keys_disable_filter() {
        let orders = [SortOrder::Ascending];
        assert_eq!(
            order_by_filter(&exprs(&["c.a"]), &orders, &[OrderByItem::undefined()]),
            ALWAYS_TRUE
        );
        assert_eq!(
            order_by_filter(&exprs(&["c.a"]), &orders, &[OrderByItem::new(json!([1]))]),
            ALWAYS_TRUE
        );
        assert_eq!(order_by_filter(&[], &[], &[]), ALWAYS_TRUE);
    }
}
