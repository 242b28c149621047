//! Flattening of traditional (row-per-table) EXPLAIN output.

use crate::model::PlanStep;

/// One row of traditional `EXPLAIN` output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TabularRow {
    pub id: Option<i64>,
    pub select_type: Option<String>,
    pub table: Option<String>,
    pub access_type: Option<String>,
    pub possible_keys: Option<String>,
    pub key: Option<String>,
    pub key_length: Option<String>,
    pub reference: Option<String>,
    pub rows: Option<i64>,
    pub filtered: Option<f64>,
    pub extra: Option<String>,
}

/// One step per row, in server order. Traditional output carries no cost estimate, so
/// `query_cost` stays empty.
#[must_use]
pub fn flatten_tabular_plan(rows: &[TabularRow]) -> Vec<PlanStep> {
    rows.iter()
        .enumerate()
        .map(|(sequence, row)| PlanStep {
            step: u32::try_from(sequence).unwrap_or(u32::MAX),
            table: row
                .table
                .clone()
                .or_else(|| row.select_type.clone())
                .unwrap_or_default(),
            access_type: row.access_type.clone(),
            rows_examined_per_scan: row.rows.and_then(|r| u64::try_from(r).ok()),
            filtered: row.filtered,
            using_index: row
                .extra
                .as_deref()
                .map(|extra| extra.contains("Using index")),
            key: row.key.clone(),
            key_length: row.key_length.clone(),
            possible_keys: row.possible_keys.clone(),
            reference: row.reference.clone(),
            ..PlanStep::default()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_rows_become_steps() {
        let rows = vec![
            TabularRow {
                id: Some(1),
                select_type: Some("SIMPLE".into()),
                table: Some("o".into()),
                access_type: Some("ALL".into()),
                rows: Some(1200),
                filtered: Some(10.0),
                extra: Some("Using where".into()),
                ..TabularRow::default()
            },
            TabularRow {
                id: Some(1),
                select_type: Some("SIMPLE".into()),
                table: Some("c".into()),
                access_type: Some("eq_ref".into()),
                key: Some("PRIMARY".into()),
                reference: Some("shop.o.customer_id".into()),
                rows: Some(1),
                extra: Some("Using index".into()),
                ..TabularRow::default()
            },
        ];

        let steps = flatten_tabular_plan(&rows);
        assert_eq!(steps.len(), 2);

        let first = steps.first().unwrap();
        assert_eq!(first.step, 0);
        assert_eq!(first.table, "o");
        assert_eq!(first.rows_examined_per_scan, Some(1200));
        assert_eq!(first.using_index, Some(false));
        assert_eq!(first.query_cost, "");

        let second = steps.get(1).unwrap();
        assert_eq!(second.step, 1);
        assert_eq!(second.key.as_deref(), Some("PRIMARY"));
        assert_eq!(second.using_index, Some(true));
    }

    #[test]
    fn test_tableless_row_uses_select_type() {
        let rows = vec![TabularRow {
            select_type: Some("UNION RESULT".into()),
            ..TabularRow::default()
        }];
        let steps = flatten_tabular_plan(&rows);
        assert_eq!(
            steps.first().map(|s| s.table.as_str()),
            Some("UNION RESULT")
        );
    }
}
