//! Flattening of `EXPLAIN FORMAT=JSON` output.
//!
//! The plan is a tree of query blocks, wrappers (ordering, grouping, windowing, ...) and table
//! accesses. It is walked pre-order in document order (`serde_json` keeps insertion order), and
//! every node that describes a real access contributes one [`PlanStep`].
//!
//! The accumulated steps are threaded through the recursion by value. A step's sequence number
//! is the number of steps emitted before it, so numbering is contiguous from zero. The query cost
//! is passed down by value as well: a node's own `cost_info.query_cost` applies to it and its
//! descendants, and siblings never see each other's cost.

use crate::error::ExtractionError;
use crate::model::PlanStep;
use serde_json::{Map, Value};

/// Keys whose object value may hold further query blocks or accesses.
const NESTED_OBJECTS: &[&str] = &[
    "query_block",
    "table",
    "ordering_operation",
    "grouping_operation",
    "duplicates_removal",
    "windowing",
    "buffer_result",
    "materialized_from_subquery",
    "union_result",
    "insert_from",
];

/// Keys whose array elements may hold further query blocks or accesses.
const NESTED_ARRAYS: &[&str] = &[
    "nested_loop",
    "select_list_subqueries",
    "query_specifications",
    "attached_subqueries",
    "optimized_away_subqueries",
    "having_subqueries",
    "order_by_subqueries",
    "group_by_subqueries",
    "windows",
    "update_value_subqueries",
];

/// Fields whose presence marks a node as an access operation rather than a wrapper.
const ACCESS_FIELDS: &[&str] = &[
    "table_name",
    "access_type",
    "rows_examined_per_scan",
    "rows_produced_per_join",
    "filtered",
];

const COST_FIELDS: &[&str] = &["read_cost", "eval_cost", "prefix_cost"];

/// Parse and flatten one statement's JSON plan.
///
/// Owner fields (identity, digest, database) are left at their defaults for the caller to fill.
///
/// # Errors
///
/// Returns an error if the payload is not JSON or has no top-level `query_block`.
pub fn flatten_json_plan(raw: &str) -> Result<Vec<PlanStep>, ExtractionError> {
    let root: Value = serde_json::from_str(raw)?;
    let root = root
        .as_object()
        .filter(|obj| obj.get("query_block").is_some_and(Value::is_object))
        .ok_or(ExtractionError::MissingQueryBlock)?;

    Ok(walk(root, "", "", Vec::new()))
}

fn walk(
    node: &Map<String, Value>,
    name_hint: &str,
    inherited_cost: &str,
    mut steps: Vec<PlanStep>,
) -> Vec<PlanStep> {
    let own_cost = node
        .get("cost_info")
        .and_then(|cost| cost.get("query_cost"))
        .and_then(text);
    let query_cost = own_cost.as_deref().unwrap_or(inherited_cost);

    if is_access(node) {
        let step = access_step(node, name_hint, query_cost, steps.len());
        steps.push(step);
    }

    for (key, value) in node {
        let key = key.as_str();
        steps = match value {
            Value::Object(child) if NESTED_OBJECTS.contains(&key) => {
                walk(child, key, query_cost, steps)
            }
            Value::Array(items) if NESTED_ARRAYS.contains(&key) => items
                .iter()
                .filter_map(Value::as_object)
                .fold(steps, |acc, child| walk(child, key, query_cost, acc)),
            _ => steps,
        };
    }

    steps
}

fn is_access(node: &Map<String, Value>) -> bool {
    ACCESS_FIELDS.iter().any(|f| node.contains_key(*f))
        || node
            .get("cost_info")
            .and_then(Value::as_object)
            .is_some_and(|cost| COST_FIELDS.iter().any(|f| cost.contains_key(*f)))
}

fn access_step(
    node: &Map<String, Value>,
    name_hint: &str,
    query_cost: &str,
    sequence: usize,
) -> PlanStep {
    let cost = node.get("cost_info");
    let cost_f64 = |field: &str| cost.and_then(|c| c.get(field)).and_then(number);

    PlanStep {
        step: u32::try_from(sequence).unwrap_or(u32::MAX),
        table: node
            .get("table_name")
            .and_then(text)
            .unwrap_or_else(|| name_hint.to_string()),
        access_type: node.get("access_type").and_then(text),
        rows_examined_per_scan: node.get("rows_examined_per_scan").and_then(count),
        rows_produced_per_join: node.get("rows_produced_per_join").and_then(count),
        filtered: node.get("filtered").and_then(number),
        read_cost: cost_f64("read_cost"),
        eval_cost: cost_f64("eval_cost"),
        prefix_cost: cost_f64("prefix_cost"),
        data_read_per_join: cost
            .and_then(|c| c.get("data_read_per_join"))
            .and_then(text),
        using_index: node.get("using_index").and_then(Value::as_bool),
        key: node.get("key").and_then(text),
        key_length: node.get("key_length").and_then(text),
        possible_keys: node.get("possible_keys").and_then(list),
        used_key_parts: node.get("used_key_parts").and_then(list),
        reference: node.get("ref").and_then(list),
        query_cost: query_cost.to_string(),
        ..PlanStep::default()
    }
}

/// Strings verbatim, numbers in their JSON rendering.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// MySQL renders most plan numbers as strings ("100.00"); accept both.
fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn list(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(text)
                .collect::<Vec<_>>()
                .join(","),
        ),
        other => text(other),
    }
}
