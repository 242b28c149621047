use super::{AttrValue, Attribute, MetricRecord};
use crate::model::{
    BlockingPair, PlanStep, SlowQueryRecord, StatementOccurrence, StatementSource, WaitEventRecord,
};

fn push_opt<T: Into<AttrValue>>(attrs: &mut Vec<Attribute>, name: &'static str, value: Option<T>) {
    if let Some(value) = value {
        attrs.push(Attribute::attribute(name, value));
    }
}

fn push_opt_gauge<T: Into<AttrValue>>(
    attrs: &mut Vec<Attribute>,
    name: &'static str,
    value: Option<T>,
) {
    if let Some(value) = value {
        attrs.push(Attribute::gauge(name, value));
    }
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.is_empty())
}

impl MetricRecord for SlowQueryRecord {
    const EVENT_TYPE: &'static str = "MysqlSlowQueriesSample";

    fn attributes(&self) -> Vec<Attribute> {
        let mut attrs = vec![
            Attribute::attribute("query_id", self.digest.as_str()),
            Attribute::attribute("query_text", self.query_text.as_str()),
            Attribute::attribute("database_name", self.database.as_str()),
            Attribute::gauge("execution_count", self.execution_count),
            Attribute::gauge("avg_cpu_time_ms", self.avg_cpu_time_ms),
            Attribute::gauge("avg_elapsed_time_ms", self.avg_elapsed_time_ms),
            Attribute::gauge("avg_rows_examined", self.avg_rows_examined),
            Attribute::gauge("avg_rows_affected", self.avg_rows_affected),
            Attribute::attribute("has_full_table_scan", self.has_full_table_scan),
            Attribute::attribute("statement_type", self.statement_type.as_str()),
        ];
        push_opt(
            &mut attrs,
            "last_execution_timestamp",
            non_empty(&self.last_execution_timestamp),
        );
        push_opt(
            &mut attrs,
            "collection_timestamp",
            non_empty(&self.collection_timestamp),
        );
        attrs
    }
}

const fn source_label(source: StatementSource) -> &'static str {
    match source {
        StatementSource::Current => "current",
        StatementSource::History => "history",
        StatementSource::HistoryLong => "history_long",
    }
}

impl MetricRecord for StatementOccurrence {
    const EVENT_TYPE: &'static str = "MysqlIndividualQueriesSample";

    fn attributes(&self) -> Vec<Attribute> {
        let mut attrs = vec![
            Attribute::attribute("query_id", self.digest.as_str()),
            Attribute::attribute("thread_id", self.identity.thread_id),
            Attribute::attribute("event_id", self.identity.event_id),
            Attribute::attribute("query_text", self.query_text.as_str()),
        ];
        push_opt(&mut attrs, "database_name", self.database.as_deref());
        attrs.extend([
            Attribute::gauge("execution_time_ms", self.execution_time_ms),
            Attribute::gauge("rows_sent", self.rows_sent),
            Attribute::gauge("rows_examined", self.rows_examined),
            Attribute::attribute("source", source_label(self.source)),
        ]);
        attrs
    }
}

impl MetricRecord for PlanStep {
    const EVENT_TYPE: &'static str = "MysqlQueryExecutionSample";

    fn attributes(&self) -> Vec<Attribute> {
        let mut attrs = vec![
            Attribute::attribute("query_id", self.digest.as_str()),
            Attribute::attribute("thread_id", self.identity.thread_id),
            Attribute::attribute("event_id", self.identity.event_id),
            Attribute::attribute("database_name", self.database.as_str()),
            Attribute::attribute("step_id", self.step),
            Attribute::attribute("table_name", self.table.as_str()),
        ];
        push_opt(&mut attrs, "access_type", self.access_type.as_deref());
        push_opt_gauge(
            &mut attrs,
            "rows_examined_per_scan",
            self.rows_examined_per_scan,
        );
        push_opt_gauge(
            &mut attrs,
            "rows_produced_per_join",
            self.rows_produced_per_join,
        );
        push_opt_gauge(&mut attrs, "filtered", self.filtered);
        push_opt_gauge(&mut attrs, "read_cost", self.read_cost);
        push_opt_gauge(&mut attrs, "eval_cost", self.eval_cost);
        push_opt_gauge(&mut attrs, "prefix_cost", self.prefix_cost);
        push_opt(
            &mut attrs,
            "data_read_per_join",
            self.data_read_per_join.as_deref(),
        );
        push_opt(&mut attrs, "using_index", self.using_index);
        push_opt(&mut attrs, "key", self.key.as_deref());
        push_opt(&mut attrs, "key_length", self.key_length.as_deref());
        push_opt(&mut attrs, "possible_keys", self.possible_keys.as_deref());
        push_opt(&mut attrs, "used_key_parts", self.used_key_parts.as_deref());
        push_opt(&mut attrs, "ref", self.reference.as_deref());
        push_opt(&mut attrs, "query_cost", non_empty(&self.query_cost));
        attrs
    }
}

impl MetricRecord for WaitEventRecord {
    const EVENT_TYPE: &'static str = "MysqlWaitEventsSample";

    fn attributes(&self) -> Vec<Attribute> {
        let mut attrs = vec![
            Attribute::attribute("query_id", self.digest.as_str()),
            Attribute::attribute("query_text", self.query_text.as_str()),
            Attribute::attribute("database_name", self.database.as_str()),
            Attribute::attribute("wait_event_name", self.wait_event_name.as_str()),
            Attribute::attribute("wait_category", self.wait_category.as_str()),
            Attribute::gauge("wait_event_count", self.wait_event_count),
            Attribute::gauge("total_wait_time_ms", self.total_wait_time_ms),
            Attribute::gauge("avg_wait_time_ms", self.avg_wait_time_ms),
        ];
        push_opt(
            &mut attrs,
            "collection_timestamp",
            non_empty(&self.collection_timestamp),
        );
        attrs
    }
}

impl MetricRecord for BlockingPair {
    const EVENT_TYPE: &'static str = "MysqlBlockingSessionsSample";

    fn attributes(&self) -> Vec<Attribute> {
        let mut attrs = vec![
            Attribute::attribute("database_name", self.database.as_str()),
            Attribute::attribute("blocked_txn_id", self.blocked_txn_id.as_str()),
            Attribute::attribute("blocked_thread_id", self.blocked_thread_id),
            Attribute::attribute("blocked_pid", self.blocked_pid),
            Attribute::attribute("blocked_query", self.blocked_query.as_str()),
        ];
        push_opt(
            &mut attrs,
            "blocked_query_id",
            self.blocked_digest.as_deref(),
        );
        attrs.extend([
            Attribute::attribute("blocked_status", self.blocked_status.as_str()),
            Attribute::attribute("blocking_txn_id", self.blocking_txn_id.as_str()),
            Attribute::attribute("blocking_thread_id", self.blocking_thread_id),
            Attribute::attribute("blocking_pid", self.blocking_pid),
            Attribute::attribute("blocking_query", self.blocking_query.as_str()),
        ]);
        push_opt(
            &mut attrs,
            "blocking_query_id",
            self.blocking_digest.as_deref(),
        );
        attrs.push(Attribute::attribute(
            "blocking_status",
            self.blocking_status.as_str(),
        ));
        push_opt(&mut attrs, "wait_started", non_empty(&self.wait_started));
        push_opt(
            &mut attrs,
            "collection_timestamp",
            non_empty(&self.collection_timestamp),
        );
        attrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::AttrKind;
    use crate::model::EventIdentity;

    fn names(attrs: &[Attribute]) -> Vec<&'static str> {
        attrs.iter().map(|a| a.name).collect()
    }

    #[test]
    fn test_plan_step_omits_absent_fields() {
        let step = PlanStep {
            identity: EventIdentity::new(7, 42),
            digest: "abc".to_string(),
            database: "shop".to_string(),
            step: 0,
            table: "t".to_string(),
            access_type: Some("ALL".to_string()),
            rows_examined_per_scan: Some(100),
            query_cost: "10".to_string(),
            ..PlanStep::default()
        };

        assert_eq!(
            names(&step.attributes()),
            vec![
                "query_id",
                "thread_id",
                "event_id",
                "database_name",
                "step_id",
                "table_name",
                "access_type",
                "rows_examined_per_scan",
                "query_cost"
            ]
        );
    }

    #[test]
    fn test_empty_query_cost_is_omitted() {
        let step = PlanStep {
            table: "t".to_string(),
            ..PlanStep::default()
        };
        assert!(!names(&step.attributes()).contains(&"query_cost"));
    }

    #[test]
    fn test_occurrence_kinds() {
        let occurrence = StatementOccurrence {
            digest: "abc".to_string(),
            identity: EventIdentity::new(1, 2),
            query_text: "SELECT 1".to_string(),
            database: None,
            execution_time_ms: 812.5,
            rows_sent: 1,
            rows_examined: 10,
            source: StatementSource::HistoryLong,
        };
        let attrs = occurrence.attributes();

        assert!(!names(&attrs).contains(&"database_name"));
        let gauges: Vec<&str> = attrs
            .iter()
            .filter(|a| a.kind == AttrKind::Gauge)
            .map(|a| a.name)
            .collect();
        assert_eq!(
            gauges,
            vec!["execution_time_ms", "rows_sent", "rows_examined"]
        );
        assert!(
            attrs
                .iter()
                .any(|a| a.name == "source" && a.value == AttrValue::Text("history_long".into()))
        );
    }
}
