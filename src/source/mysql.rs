use super::queries::{
    self, NOISE_PATTERNS, build_blocking_sessions_query, build_consumers_query,
    build_instruments_query, build_occurrences_query, build_slow_queries_query,
    build_wait_events_query,
};
use super::{
    ExplainOutput, ExplainSession, OccurrenceFilter, PerformanceSchema, SetupState,
    SlowQueryFilter,
};
use crate::collectors::config::ExplainFormat;
use crate::collectors::plans::tabular::TabularRow;
use crate::collectors::util::{ConnectionTarget, ExcludedDatabases, with_timeout};
use crate::error::CollectionError;
use crate::model::{
    BlockingPair, EventIdentity, SlowQueryRecord, StatementOccurrence, StatementSource,
    WaitEventRecord,
};
use futures::future::BoxFuture;
use sqlx::mysql::MySqlRow;
use sqlx::{Connection, FromRow, MySqlConnection, MySqlPool, Row};
use std::time::Duration;
use tracing::{debug, info_span};
use tracing_futures::Instrument as _;

/// [`PerformanceSchema`] backed by a sqlx pool on the monitored server.
#[derive(Clone, Debug)]
pub struct MySqlSource {
    pool: MySqlPool,
    target: ConnectionTarget,
    query_timeout: Duration,
}

impl MySqlSource {
    #[must_use]
    pub const fn new(pool: MySqlPool, target: ConnectionTarget, query_timeout: Duration) -> Self {
        Self {
            pool,
            target,
            query_timeout,
        }
    }

    #[must_use]
    pub const fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct SlowQueryRow {
    digest: String,
    query_text: Option<String>,
    database_name: Option<String>,
    execution_count: i64,
    avg_cpu_time_ms: Option<f64>,
    avg_elapsed_time_ms: Option<f64>,
    avg_rows_examined: Option<f64>,
    avg_rows_affected: Option<f64>,
    has_full_table_scan: Option<i64>,
    statement_type: Option<String>,
    last_execution_timestamp: Option<String>,
    collection_timestamp: Option<String>,
}

impl From<SlowQueryRow> for SlowQueryRecord {
    fn from(row: SlowQueryRow) -> Self {
        Self {
            digest: row.digest,
            query_text: row.query_text.unwrap_or_default(),
            database: row.database_name.unwrap_or_default(),
            execution_count: row.execution_count,
            avg_cpu_time_ms: row.avg_cpu_time_ms.unwrap_or_default(),
            avg_elapsed_time_ms: row.avg_elapsed_time_ms.unwrap_or_default(),
            avg_rows_examined: row.avg_rows_examined.unwrap_or_default(),
            avg_rows_affected: row.avg_rows_affected.unwrap_or_default(),
            has_full_table_scan: row.has_full_table_scan.unwrap_or(0) > 0,
            statement_type: row.statement_type.unwrap_or_else(|| "OTHER".to_string()),
            last_execution_timestamp: row.last_execution_timestamp.unwrap_or_default(),
            collection_timestamp: row.collection_timestamp.unwrap_or_default(),
        }
    }
}

#[derive(FromRow)]
struct OccurrenceRow {
    digest: String,
    query_text: Option<String>,
    thread_id: i64,
    event_id: i64,
    database_name: Option<String>,
    execution_time_ms: Option<f64>,
    rows_sent: Option<i64>,
    rows_examined: Option<i64>,
}

impl OccurrenceRow {
    fn into_occurrence(self, source: StatementSource) -> StatementOccurrence {
        StatementOccurrence {
            digest: self.digest,
            identity: EventIdentity::new(self.thread_id, self.event_id),
            query_text: self.query_text.unwrap_or_default(),
            database: self.database_name,
            execution_time_ms: self.execution_time_ms.unwrap_or_default(),
            rows_sent: self.rows_sent.unwrap_or_default(),
            rows_examined: self.rows_examined.unwrap_or_default(),
            source,
        }
    }
}

#[derive(FromRow)]
struct WaitEventRow {
    digest: String,
    query_text: Option<String>,
    database_name: String,
    wait_event_name: String,
    wait_category: String,
    wait_event_count: i64,
    total_wait_time_ms: Option<f64>,
    avg_wait_time_ms: Option<f64>,
    collection_timestamp: Option<String>,
}

impl From<WaitEventRow> for WaitEventRecord {
    fn from(row: WaitEventRow) -> Self {
        Self {
            digest: row.digest,
            query_text: row.query_text.unwrap_or_default(),
            database: row.database_name,
            wait_event_name: row.wait_event_name,
            wait_category: row.wait_category,
            wait_event_count: row.wait_event_count,
            total_wait_time_ms: row.total_wait_time_ms.unwrap_or_default(),
            avg_wait_time_ms: row.avg_wait_time_ms.unwrap_or_default(),
            collection_timestamp: row.collection_timestamp.unwrap_or_default(),
        }
    }
}

#[derive(FromRow)]
struct BlockingRow {
    database_name: String,
    blocked_txn_id: String,
    blocked_thread_id: i64,
    blocked_pid: i64,
    blocked_query: String,
    blocked_digest: Option<String>,
    blocked_status: Option<String>,
    blocking_txn_id: String,
    blocking_thread_id: i64,
    blocking_pid: i64,
    blocking_query: String,
    blocking_digest: Option<String>,
    blocking_status: Option<String>,
    wait_started: Option<String>,
    collection_timestamp: Option<String>,
}

impl From<BlockingRow> for BlockingPair {
    fn from(row: BlockingRow) -> Self {
        Self {
            database: row.database_name,
            blocked_txn_id: row.blocked_txn_id,
            blocked_thread_id: row.blocked_thread_id,
            blocked_pid: row.blocked_pid,
            blocked_query: row.blocked_query,
            blocked_digest: row.blocked_digest,
            blocked_status: row.blocked_status.unwrap_or_default(),
            blocking_txn_id: row.blocking_txn_id,
            blocking_thread_id: row.blocking_thread_id,
            blocking_pid: row.blocking_pid,
            blocking_query: row.blocking_query,
            blocking_digest: row.blocking_digest,
            blocking_status: row.blocking_status.unwrap_or_default(),
            wait_started: row.wait_started.unwrap_or_default(),
            collection_timestamp: row.collection_timestamp.unwrap_or_default(),
        }
    }
}

impl PerformanceSchema for MySqlSource {
    fn server_version(&self) -> BoxFuture<'_, Result<String, CollectionError>> {
        Box::pin(async move {
            let span = info_span!(
                "db.query",
                db.system = "mysql",
                db.operation = "SELECT",
                db.statement = queries::SERVER_VERSION,
                otel.kind = "client"
            );
            with_timeout(
                "server_version",
                self.query_timeout,
                sqlx::query_scalar::<_, String>(queries::SERVER_VERSION).fetch_one(&self.pool),
            )
            .instrument(span)
            .await
        })
    }

    fn performance_schema_enabled(&self) -> BoxFuture<'_, Result<bool, CollectionError>> {
        Box::pin(async move {
            let span = info_span!(
                "db.query",
                db.system = "mysql",
                db.operation = "SHOW",
                db.statement = queries::PERFORMANCE_SCHEMA_FLAG,
                otel.kind = "client"
            );
            let row = with_timeout(
                "performance_schema_flag",
                self.query_timeout,
                sqlx::query_as::<_, (String, String)>(queries::PERFORMANCE_SCHEMA_FLAG)
                    .fetch_optional(&self.pool),
            )
            .instrument(span)
            .await?;

            Ok(row.is_some_and(|(_, value)| value.eq_ignore_ascii_case("ON") || value == "1"))
        })
    }

    fn consumers<'a>(
        &'a self,
        names: &'a [&'static str],
    ) -> BoxFuture<'a, Result<Vec<SetupState>, CollectionError>> {
        Box::pin(async move {
            let sql = build_consumers_query(names.len());
            let span = info_span!(
                "db.query",
                db.system = "mysql",
                db.operation = "SELECT",
                db.statement = "select setup_consumers",
                otel.kind = "client"
            );

            let mut query = sqlx::query_as::<_, (String, String)>(&sql);
            for name in names {
                query = query.bind(*name);
            }

            let rows = with_timeout(
                "setup_consumers",
                self.query_timeout,
                query.fetch_all(&self.pool),
            )
            .instrument(span)
            .await?;

            Ok(rows
                .into_iter()
                .map(|(name, enabled)| SetupState::from_flags(name, &enabled, None))
                .collect())
        })
    }

    fn instruments<'a>(
        &'a self,
        patterns: &'a [&'static str],
    ) -> BoxFuture<'a, Result<Vec<SetupState>, CollectionError>> {
        Box::pin(async move {
            let sql = build_instruments_query(patterns.len());
            let span = info_span!(
                "db.query",
                db.system = "mysql",
                db.operation = "SELECT",
                db.statement = "select setup_instruments",
                otel.kind = "client"
            );

            let mut query = sqlx::query_as::<_, (String, String, Option<String>)>(&sql);
            for pattern in patterns {
                query = query.bind(*pattern);
            }

            let rows = with_timeout(
                "setup_instruments",
                self.query_timeout,
                query.fetch_all(&self.pool),
            )
            .instrument(span)
            .await?;

            Ok(rows
                .into_iter()
                .map(|(name, enabled, timed)| {
                    SetupState::from_flags(name, &enabled, timed.as_deref())
                })
                .collect())
        })
    }

    fn slow_queries<'a>(
        &'a self,
        filter: SlowQueryFilter<'a>,
    ) -> BoxFuture<'a, Result<Vec<SlowQueryRecord>, CollectionError>> {
        Box::pin(async move {
            let sql = build_slow_queries_query(filter.excluded.len());
            let span = info_span!(
                "db.query",
                db.system = "mysql",
                db.operation = "SELECT",
                db.statement = "slow statement digests",
                otel.kind = "client"
            );

            let mut query = sqlx::query_as::<_, SlowQueryRow>(&sql)
                .persistent(false)
                .bind(filter.lookback_seconds);
            for db in filter.excluded.iter() {
                query = query.bind(db);
            }
            for pattern in NOISE_PATTERNS {
                query = query.bind(*pattern);
            }
            query = query.bind(filter.limit);

            let rows = with_timeout(
                "slow_queries",
                self.query_timeout,
                query.fetch_all(&self.pool),
            )
            .instrument(span)
            .await?;

            debug!(rows = rows.len(), "fetched slow query digests");
            Ok(rows.into_iter().map(SlowQueryRecord::from).collect())
        })
    }

    fn statement_occurrences<'a>(
        &'a self,
        source: StatementSource,
        digest: &'a str,
        filter: OccurrenceFilter<'a>,
    ) -> BoxFuture<'a, Result<Vec<StatementOccurrence>, CollectionError>> {
        Box::pin(async move {
            let sql = build_occurrences_query(source, filter.excluded.len());
            let span = info_span!(
                "db.query",
                db.system = "mysql",
                db.operation = "SELECT",
                db.statement = source.table(),
                otel.kind = "client"
            );

            let mut query = sqlx::query_as::<_, OccurrenceRow>(&sql)
                .persistent(false)
                .bind(digest);
            for db in filter.excluded.iter() {
                query = query.bind(db);
            }
            query = query
                .bind(filter.response_time_threshold_ms)
                .bind(filter.limit);

            let rows = with_timeout(
                source.table(),
                self.query_timeout,
                query.fetch_all(&self.pool),
            )
            .instrument(span)
            .await?;

            Ok(rows
                .into_iter()
                .map(|row| row.into_occurrence(source))
                .collect())
        })
    }

    fn open_explain_session<'a>(
        &'a self,
        database: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ExplainSession>, CollectionError>> {
        Box::pin(async move {
            let opts = self.target.options_for_db(database);
            let conn = match tokio::time::timeout(
                self.query_timeout,
                MySqlConnection::connect_with(&opts),
            )
            .await
            {
                Ok(Ok(conn)) => conn,
                Ok(Err(source)) => {
                    return Err(CollectionError::Connect {
                        database: database.to_string(),
                        source,
                    });
                }
                Err(_) => {
                    return Err(CollectionError::Timeout {
                        query: "connect",
                        after: self.query_timeout,
                    });
                }
            };

            debug!(database, "opened explain session");
            Ok(Box::new(MySqlExplainSession {
                conn,
                database: database.to_string(),
                query_timeout: self.query_timeout,
            }) as Box<dyn ExplainSession>)
        })
    }

    fn wait_events<'a>(
        &'a self,
        excluded: &'a ExcludedDatabases,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<WaitEventRecord>, CollectionError>> {
        Box::pin(async move {
            let sql = build_wait_events_query(excluded.len());
            let span = info_span!(
                "db.query",
                db.system = "mysql",
                db.operation = "SELECT",
                db.statement = "wait events by digest",
                otel.kind = "client"
            );

            let mut query = sqlx::query_as::<_, WaitEventRow>(&sql).persistent(false);
            for db in excluded.iter() {
                query = query.bind(db);
            }
            query = query.bind(limit);

            let rows = with_timeout(
                "wait_events",
                self.query_timeout,
                query.fetch_all(&self.pool),
            )
            .instrument(span)
            .await?;

            Ok(rows.into_iter().map(WaitEventRecord::from).collect())
        })
    }

    fn blocking_sessions<'a>(
        &'a self,
        excluded: &'a ExcludedDatabases,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<BlockingPair>, CollectionError>> {
        Box::pin(async move {
            let sql = build_blocking_sessions_query(excluded.len());
            let span = info_span!(
                "db.query",
                db.system = "mysql",
                db.operation = "SELECT",
                db.statement = "lock waits with blocking transactions",
                otel.kind = "client"
            );

            let mut query = sqlx::query_as::<_, BlockingRow>(&sql).persistent(false);
            for db in excluded.iter() {
                query = query.bind(db);
            }
            query = query.bind(limit);

            let rows = with_timeout(
                "blocking_sessions",
                self.query_timeout,
                query.fetch_all(&self.pool),
            )
            .instrument(span)
            .await?;

            Ok(rows.into_iter().map(BlockingPair::from).collect())
        })
    }
}

struct MySqlExplainSession {
    conn: MySqlConnection,
    database: String,
    query_timeout: Duration,
}

impl ExplainSession for MySqlExplainSession {
    fn explain<'a>(
        &'a mut self,
        statement: &'a str,
        format: ExplainFormat,
    ) -> BoxFuture<'a, Result<ExplainOutput, CollectionError>> {
        Box::pin(async move {
            let span = info_span!(
                "db.query",
                db.system = "mysql",
                db.operation = "EXPLAIN",
                db.name = %self.database,
                otel.kind = "client"
            );

            match format {
                ExplainFormat::Json => {
                    let sql = format!("EXPLAIN FORMAT=JSON {statement}");
                    let row: MySqlRow = with_timeout(
                        "explain_json",
                        self.query_timeout,
                        sqlx::query(&sql).persistent(false).fetch_one(&mut self.conn),
                    )
                    .instrument(span)
                    .await?;

                    let plan: String = row.try_get(0).map_err(|e| CollectionError::Decode {
                        query: "explain_json",
                        message: e.to_string(),
                    })?;
                    Ok(ExplainOutput::Json(plan))
                }
                ExplainFormat::Tabular => {
                    let sql = format!("EXPLAIN {statement}");
                    let rows: Vec<MySqlRow> = with_timeout(
                        "explain_tabular",
                        self.query_timeout,
                        sqlx::query(&sql).persistent(false).fetch_all(&mut self.conn),
                    )
                    .instrument(span)
                    .await?;

                    Ok(ExplainOutput::Tabular(rows.iter().map(tabular_row).collect()))
                }
            }
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let database = self.database;
            if let Err(e) = self.conn.close().await {
                debug!(database = %database, error = %e, "explain session did not close cleanly");
            }
        })
    }
}

fn opt_text(row: &MySqlRow, column: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(column).ok().flatten()
}

fn opt_int(row: &MySqlRow, column: &str) -> Option<i64> {
    row.try_get::<Option<i64>, _>(column)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<u64>, _>(column)
                .ok()
                .flatten()
                .and_then(|v| i64::try_from(v).ok())
        })
}

fn opt_float(row: &MySqlRow, column: &str) -> Option<f64> {
    row.try_get::<Option<f64>, _>(column)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<f32>, _>(column)
                .ok()
                .flatten()
                .map(f64::from)
        })
}

fn tabular_row(row: &MySqlRow) -> TabularRow {
    TabularRow {
        id: opt_int(row, "id"),
        select_type: opt_text(row, "select_type"),
        table: opt_text(row, "table"),
        access_type: opt_text(row, "type"),
        possible_keys: opt_text(row, "possible_keys"),
        key: opt_text(row, "key"),
        key_length: opt_text(row, "key_len"),
        reference: opt_text(row, "ref"),
        rows: opt_int(row, "rows"),
        filtered: opt_float(row, "filtered"),
        extra: opt_text(row, "Extra"),
    }
}
