#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use common::{FakeSchema, occurrence, slow_query, wait_event};
use mysql_query_insights::cli::actions::run::run_every;
use mysql_query_insights::collectors::Stage;
use mysql_query_insights::collectors::config::{MAX_INDIVIDUAL_QUERY_LIMIT, PipelineConfig};
use mysql_query_insights::collectors::metrics::StageMetrics;
use mysql_query_insights::emitter::{AttrValue, Entity, MemoryEmitter};
use mysql_query_insights::error::{CollectionError, PipelineError, ValidationError};
use mysql_query_insights::model::StatementSource::{self, Current, History};
use mysql_query_insights::pipeline::{CycleContext, CycleReport, StageStatus, run_cycle};
use mysql_query_insights::source::{ExplainOutput, SetupState};
use std::sync::atomic::Ordering;
use std::time::Duration;

const ORDERS_BY_CUSTOMER: &str = "SELECT * FROM orders WHERE customer_id = 42";
const ORDERS_BY_STATUS: &str = "SELECT * FROM orders WHERE status = 'open'";

const ORDERS_PLAN: &str = r#"{"query_block":{"cost_info":{"query_cost":"10"},"table":{"table_name":"t","access_type":"ALL","rows_examined_per_scan":100}}}"#;

async fn run(
    source: &FakeSchema,
    config: &PipelineConfig,
) -> (Result<CycleReport, PipelineError>, MemoryEmitter) {
    let entity = Entity::new("db.internal", 3306, true);
    let metrics = StageMetrics::new().unwrap();
    let ctx = CycleContext {
        config,
        entity: &entity,
        metrics: &metrics,
    };
    let mut emitter = MemoryEmitter::default();
    let result = run_cycle(source, &mut emitter, &ctx).await;
    (result, emitter)
}

fn attr<'a>(
    sample: &'a [mysql_query_insights::emitter::Attribute],
    name: &str,
) -> Option<&'a AttrValue> {
    sample.iter().find(|a| a.name == name).map(|a| &a.value)
}

/// One hot digest `D1` whose events show up in several statement tables.
fn workload() -> FakeSchema {
    let mut source = FakeSchema::healthy()
        .with_occurrences(
            StatementSource::Current,
            "D1",
            vec![occurrence("D1", 7, 1, "shop", ORDERS_BY_CUSTOMER, Current)],
        )
        .with_occurrences(
            StatementSource::History,
            "D1",
            vec![
                occurrence("D1", 7, 1, "shop", ORDERS_BY_CUSTOMER, History),
                occurrence("D1", 7, 2, "shop", ORDERS_BY_STATUS, History),
            ],
        );
    source.slow = vec![slow_query("D1", "shop", 900.0)];
    source
}

#[tokio::test]
async fn disabled_consumer_aborts_cycle_before_collection() {
    let mut source = workload();
    for consumer in &mut source.consumers {
        if consumer.name == "events_stages_current" {
            *consumer = SetupState::from_flags(consumer.name.clone(), "NO", None);
        }
    }

    let (result, emitter) = run(&source, &PipelineConfig::new()).await;

    match result {
        Err(PipelineError::Validation(ValidationError::ConsumerNotEnabled(name))) => {
            assert_eq!(name, "events_stages_current");
        }
        other => panic!("expected consumer validation failure, got {other:?}"),
    }
    assert_eq!(source.called("slow_queries"), 0);
    assert_eq!(source.called("statement_occurrences"), 0);
    assert_eq!(source.called("wait_events"), 0);
    assert_eq!(source.called("blocking_sessions"), 0);
    assert!(emitter.batches.is_empty());
}

#[tokio::test]
async fn disabled_performance_schema_is_reported_with_version() {
    let mut source = workload();
    source.schema_enabled = false;

    let (result, _) = run(&source, &PipelineConfig::new()).await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::SchemaDisabled { version }))
            if version.major == 8
    ));

    source.version = "5.7.44-log".to_string();
    let (result, _) = run(&source, &PipelineConfig::new()).await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::UnsupportedVersion { .. }))
    ));
}

#[tokio::test]
async fn untimed_instrument_fails_validation() {
    let mut source = workload();
    source.instruments.push(SetupState::from_flags(
        "wait/synch/mutex/innodb/buf_pool_mutex".into(),
        "YES",
        Some("NO"),
    ));

    let (result, _) = run(&source, &PipelineConfig::new()).await;
    assert!(matches!(
        result,
        Err(PipelineError::Validation(ValidationError::InstrumentNotEnabled(ref name)))
            if name == "wait/synch/mutex/innodb/buf_pool_mutex"
    ));
}

#[tokio::test]
async fn occurrences_are_deduplicated_across_statement_tables() {
    let source = workload();
    let (result, emitter) = run(&source, &PipelineConfig::new()).await;
    let report = result.unwrap();

    assert!(matches!(
        report.status(Stage::IndividualQueries),
        Some(StageStatus::Completed { records: 2 })
    ));

    let samples = emitter.samples("MysqlIndividualQueriesSample");
    let identities: Vec<(Option<&AttrValue>, Option<&AttrValue>, Option<&AttrValue>)> = samples
        .iter()
        .map(|s| {
            (
                attr(s, "thread_id"),
                attr(s, "event_id"),
                attr(s, "source"),
            )
        })
        .collect();
    assert_eq!(
        identities,
        vec![
            (
                Some(&AttrValue::Int(7)),
                Some(&AttrValue::Int(1)),
                Some(&AttrValue::Text("current".into()))
            ),
            (
                Some(&AttrValue::Int(7)),
                Some(&AttrValue::Int(2)),
                Some(&AttrValue::Text("history".into()))
            ),
        ]
    );

    // One lookup per statement table for the single digest.
    assert_eq!(source.called("statement_occurrences"), 3);
}

#[tokio::test]
async fn no_hot_digests_skips_correlation_and_plans() {
    let mut source = workload();
    source.slow.clear();

    let (result, emitter) = run(&source, &PipelineConfig::new()).await;
    let report = result.unwrap();

    assert_eq!(source.called("statement_occurrences"), 0);
    assert_eq!(source.called("open_explain_session"), 0);
    assert!(matches!(
        report.status(Stage::IndividualQueries),
        Some(StageStatus::Skipped { .. })
    ));
    assert!(matches!(
        report.status(Stage::ExecutionPlans),
        Some(StageStatus::Skipped { .. })
    ));
    assert!(emitter.samples("MysqlSlowQueriesSample").is_empty());
    assert_eq!(source.called("wait_events"), 1);
    assert_eq!(source.called("blocking_sessions"), 1);
}

#[tokio::test]
async fn plans_are_flattened_per_statement() {
    let source = workload().with_plans(vec![(
        ORDERS_BY_CUSTOMER,
        ExplainOutput::Json(ORDERS_PLAN.to_string()),
    )]);

    let (result, emitter) = run(&source, &PipelineConfig::new()).await;
    let report = result.unwrap();

    // The second statement has no plan in the fake; it is skipped, not fatal.
    assert!(matches!(
        report.status(Stage::ExecutionPlans),
        Some(StageStatus::Completed { records: 1 })
    ));

    let samples = emitter.samples("MysqlQueryExecutionSample");
    assert_eq!(samples.len(), 1);
    let step = samples.first().unwrap();
    assert_eq!(attr(step, "step_id"), Some(&AttrValue::Int(0)));
    assert_eq!(attr(step, "table_name"), Some(&AttrValue::Text("t".into())));
    assert_eq!(
        attr(step, "access_type"),
        Some(&AttrValue::Text("ALL".into()))
    );
    assert_eq!(
        attr(step, "rows_examined_per_scan"),
        Some(&AttrValue::Int(100))
    );
    assert_eq!(
        attr(step, "query_cost"),
        Some(&AttrValue::Text("10".into()))
    );
    assert_eq!(attr(step, "event_id"), Some(&AttrValue::Int(1)));
    assert_eq!(
        attr(step, "database_name"),
        Some(&AttrValue::Text("shop".into()))
    );

    // One session for the single database group, released afterwards.
    assert_eq!(source.sessions_opened.load(Ordering::SeqCst), 1);
    assert_eq!(source.sessions_closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_plan_does_not_block_other_statements() {
    let source = workload().with_plans(vec![
        (ORDERS_BY_CUSTOMER, ExplainOutput::Json("{\"query_block\": [".to_string())),
        (ORDERS_BY_STATUS, ExplainOutput::Json(ORDERS_PLAN.to_string())),
    ]);

    let (result, emitter) = run(&source, &PipelineConfig::new()).await;
    result.unwrap();

    let samples = emitter.samples("MysqlQueryExecutionSample");
    assert_eq!(samples.len(), 1);
    assert_eq!(
        samples.first().and_then(|s| attr(s, "event_id")),
        Some(&AttrValue::Int(2))
    );
    assert_eq!(source.sessions_closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn one_session_per_database_group() {
    let mut source = workload()
        .with_occurrences(
            StatementSource::Current,
            "D2",
            vec![occurrence("D2", 9, 30, "billing", "SELECT * FROM invoices", Current)],
        )
        .with_plans(vec![
            (ORDERS_BY_CUSTOMER, ExplainOutput::Json(ORDERS_PLAN.to_string())),
            ("SELECT * FROM invoices", ExplainOutput::Json(ORDERS_PLAN.to_string())),
        ]);
    source.slow.push(slow_query("D2", "billing", 600.0));
    source.unreachable_databases = vec!["billing".to_string()];

    let (result, _) = run(&source, &PipelineConfig::new()).await;
    result.unwrap();

    let opened: Vec<String> = source
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("open_explain_session"))
        .collect();
    assert_eq!(
        opened,
        vec!["open_explain_session:shop", "open_explain_session:billing"]
    );
    // The unreachable group never got a session, the other one was closed.
    assert_eq!(source.sessions_opened.load(Ordering::SeqCst), 1);
    assert_eq!(source.sessions_closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_stage_does_not_stop_independent_stages() {
    let mut source = workload();
    source.fail_waits = true;

    let (result, emitter) = run(&source, &PipelineConfig::new()).await;
    let report = result.unwrap();

    assert!(matches!(
        report.status(Stage::WaitEvents),
        Some(StageStatus::Failed(PipelineError::Stage {
            stage: "wait_events",
            source: CollectionError::Timeout { .. }
        }))
    ));
    assert!(matches!(
        report.status(Stage::BlockingSessions),
        Some(StageStatus::Completed { .. })
    ));
    assert_eq!(report.failures(), 1);
    assert_eq!(emitter.samples("MysqlSlowQueriesSample").len(), 1);
}

#[tokio::test]
async fn stuck_stage_times_out() {
    let mut source = workload();
    source.slow_delay = Some(Duration::from_secs(10));
    let mut config = PipelineConfig::new();
    config.stage_timeout = Duration::from_millis(50);

    let (result, _) = run(&source, &config).await;
    let report = result.unwrap();

    assert!(matches!(
        report.status(Stage::SlowQueries),
        Some(StageStatus::Failed(PipelineError::Stage {
            source: CollectionError::Timeout { .. },
            ..
        }))
    ));
    assert!(matches!(
        report.status(Stage::IndividualQueries),
        Some(StageStatus::Skipped { .. })
    ));
    assert_eq!(source.called("wait_events"), 1);
}

#[tokio::test]
async fn disabled_stages_are_not_queried() {
    let source = workload();
    let config = PipelineConfig::new().with_enabled(&[Stage::WaitEvents]);

    let (result, _) = run(&source, &config).await;
    let report = result.unwrap();

    assert_eq!(source.called("slow_queries"), 0);
    assert_eq!(source.called("blocking_sessions"), 0);
    assert_eq!(source.called("wait_events"), 1);
    assert!(matches!(
        report.status(Stage::SlowQueries),
        Some(StageStatus::Disabled)
    ));
}

#[tokio::test]
async fn clamped_limits_reach_the_source() {
    let source = workload();
    let config = PipelineConfig::new().with_limits(10_000, 10, 50, 50);

    let (result, _) = run(&source, &config).await;
    result.unwrap();

    assert_eq!(source.called("slow_queries:100"), 1);
}

#[tokio::test]
async fn per_digest_cap_holds_when_limit_is_set_directly() {
    let mut source = FakeSchema::healthy().with_occurrences(
        StatementSource::Current,
        "D1",
        (0..120)
            .map(|i| occurrence("D1", 7, i, "shop", ORDERS_BY_CUSTOMER, Current))
            .collect(),
    );
    source.slow = vec![slow_query("D1", "shop", 900.0)];

    let mut config =
        PipelineConfig::new().with_enabled(&[Stage::SlowQueries, Stage::IndividualQueries]);
    config.individual_query_limit = 10_000;

    let (result, emitter) = run(&source, &config).await;
    result.unwrap();

    assert_eq!(
        emitter.samples("MysqlIndividualQueriesSample").len(),
        MAX_INDIVIDUAL_QUERY_LIMIT as usize
    );
}

#[tokio::test]
async fn wait_events_are_published_in_bounded_batches() {
    let mut source = workload();
    source.waits = (0..150)
        .map(|i| wait_event("D1", "wait/io/file/innodb/innodb_data_file", f64::from(i)))
        .collect();

    let config = PipelineConfig::new().with_limits(20, 10, 200, 50);
    let (result, emitter) = run(&source, &config).await;
    result.unwrap();

    let sizes: Vec<usize> = emitter
        .batches
        .iter()
        .filter(|(event_type, _)| *event_type == "MysqlWaitEventsSample")
        .map(|(_, samples)| samples.len())
        .collect();
    assert_eq!(sizes, vec![100, 50]);

    let first = emitter.samples("MysqlWaitEventsSample");
    assert_eq!(
        first.first().and_then(|s| attr(s, "total_wait_time_ms")),
        Some(&AttrValue::Float(149.0))
    );
}

#[tokio::test]
async fn interrupt_abandons_in_flight_cycle() {
    let mut source = workload();
    source.slow_delay = Some(Duration::from_secs(30));
    let config = PipelineConfig::new();
    let entity = Entity::new("db.internal", 3306, true);
    let metrics = StageMetrics::new().unwrap();
    let ctx = CycleContext {
        config: &config,
        entity: &entity,
        metrics: &metrics,
    };
    let mut emitter = MemoryEmitter::default();

    let interrupted = tokio::time::sleep(Duration::from_millis(50));
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        run_every(
            Duration::from_secs(60),
            &source,
            &mut emitter,
            &ctx,
            None,
            interrupted,
        ),
    )
    .await;

    assert!(
        matches!(result, Ok(Ok(()))),
        "loop did not stop: {result:?}"
    );
    assert_eq!(source.called("slow_queries"), 1);
    assert!(emitter.samples("MysqlSlowQueriesSample").is_empty());
}

#[tokio::test]
async fn interrupt_between_cycles_stops_the_loop() {
    let source = workload();
    let config = PipelineConfig::new();
    let entity = Entity::new("db.internal", 3306, true);
    let metrics = StageMetrics::new().unwrap();
    let ctx = CycleContext {
        config: &config,
        entity: &entity,
        metrics: &metrics,
    };
    let mut emitter = MemoryEmitter::default();

    let interrupted = tokio::time::sleep(Duration::from_millis(200));
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        run_every(
            Duration::from_secs(60),
            &source,
            &mut emitter,
            &ctx,
            None,
            interrupted,
        ),
    )
    .await;

    assert!(
        matches!(result, Ok(Ok(()))),
        "loop did not stop: {result:?}"
    );
    assert!(metrics.render().unwrap().contains("query_insights_cycles_total 1"));
    assert_eq!(emitter.samples("MysqlSlowQueriesSample").len(), 1);
}
