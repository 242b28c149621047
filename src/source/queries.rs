//! SQL text for the performance_schema / information_schema views the stages read.
//!
//! Lists of unknown length (excluded databases, consumer names) are rendered as `?` placeholders;
//! values are always bound, never interpolated.

use crate::collectors::util::placeholders;
use crate::model::StatementSource;

/// Digest text fragments produced by monitoring and administration rather than by applications.
pub const NOISE_PATTERNS: &[&str] = &[
    "%performance_schema%",
    "%information_schema%",
    "%`mysql` .%",
    "%@@%",
    "SET %",
    "SHOW %",
    "EXPLAIN %",
    "DESC %",
    "CREATE %",
    "ALTER %",
    "DROP %",
    "TRUNCATE %",
    "GRANT %",
    "FLUSH %",
    "START TRANSACTION%",
    "BEGIN%",
    "COMMIT%",
    "ROLLBACK%",
    "SELECT VERSION ( )%",
    "SELECT DATABASE ( )%",
];

/// Instrument name patterns that must be enabled and timed.
pub const INSTRUMENT_PATTERNS: &[&str] = &["wait/%", "statement/%", "%lock%"];

pub(super) const SERVER_VERSION: &str = "SELECT VERSION()";

pub(super) const PERFORMANCE_SCHEMA_FLAG: &str =
    "SHOW GLOBAL VARIABLES LIKE 'performance_schema'";

pub(super) fn build_consumers_query(count: usize) -> String {
    format!(
        "SELECT CAST(NAME AS CHAR) AS name, CAST(ENABLED AS CHAR) AS enabled
         FROM performance_schema.setup_consumers
         WHERE NAME IN ({})",
        placeholders(count)
    )
}

pub(super) fn build_instruments_query(patterns: usize) -> String {
    let filter = vec!["NAME LIKE ?"; patterns.max(1)].join(" OR ");
    format!(
        "SELECT CAST(NAME AS CHAR) AS name,
                CAST(ENABLED AS CHAR) AS enabled,
                CAST(TIMED AS CHAR) AS timed
         FROM performance_schema.setup_instruments
         WHERE {filter}
         ORDER BY NAME"
    )
}

/// Digests seen within the lookback window, slowest average first.
///
/// Binds: lookback seconds, excluded databases, noise patterns, limit.
pub(super) fn build_slow_queries_query(excluded: usize) -> String {
    let noise = vec!["AND DIGEST_TEXT NOT LIKE ?"; NOISE_PATTERNS.len()].join("\n               ");
    format!(
        "SELECT
            DIGEST AS digest,
            CASE WHEN CHAR_LENGTH(DIGEST_TEXT) > 4000
                 THEN CONCAT(LEFT(DIGEST_TEXT, 3997), '...')
                 ELSE DIGEST_TEXT END AS query_text,
            SCHEMA_NAME AS database_name,
            CAST(COUNT_STAR AS SIGNED) AS execution_count,
            CAST(ROUND(SUM_CPU_TIME / COUNT_STAR / 1000000000, 3) AS DOUBLE) AS avg_cpu_time_ms,
            CAST(ROUND(SUM_TIMER_WAIT / COUNT_STAR / 1000000000, 3) AS DOUBLE) AS avg_elapsed_time_ms,
            CAST(SUM_ROWS_EXAMINED / COUNT_STAR AS DOUBLE) AS avg_rows_examined,
            CAST(SUM_ROWS_AFFECTED / COUNT_STAR AS DOUBLE) AS avg_rows_affected,
            CAST(SUM_NO_INDEX_USED > 0 AS SIGNED) AS has_full_table_scan,
            CASE
                WHEN DIGEST_TEXT LIKE 'SELECT%' THEN 'SELECT'
                WHEN DIGEST_TEXT LIKE 'INSERT%' THEN 'INSERT'
                WHEN DIGEST_TEXT LIKE 'UPDATE%' THEN 'UPDATE'
                WHEN DIGEST_TEXT LIKE 'DELETE%' THEN 'DELETE'
                WHEN DIGEST_TEXT LIKE 'WITH%' THEN 'WITH'
                ELSE 'OTHER'
            END AS statement_type,
            DATE_FORMAT(CONVERT_TZ(LAST_SEEN, @@session.time_zone, '+00:00'), '%Y-%m-%dT%H:%i:%sZ')
                AS last_execution_timestamp,
            DATE_FORMAT(UTC_TIMESTAMP(), '%Y-%m-%dT%H:%i:%sZ') AS collection_timestamp
         FROM performance_schema.events_statements_summary_by_digest
         WHERE LAST_SEEN >= NOW() - INTERVAL ? SECOND
               AND COUNT_STAR > 0
               AND DIGEST IS NOT NULL
               AND SCHEMA_NAME IS NOT NULL
               AND SCHEMA_NAME NOT IN ({})
               {noise}
         ORDER BY avg_elapsed_time_ms DESC
         LIMIT ?",
        placeholders(excluded)
    )
}

/// Occurrences of one digest in one statement table.
///
/// Binds: digest, excluded databases, response time threshold (ms), limit.
pub(super) fn build_occurrences_query(source: StatementSource, excluded: usize) -> String {
    format!(
        "SELECT
            DIGEST AS digest,
            CASE WHEN CHAR_LENGTH(SQL_TEXT) > 4000
                 THEN CONCAT(LEFT(SQL_TEXT, 3997), '...')
                 ELSE SQL_TEXT END AS query_text,
            CAST(THREAD_ID AS SIGNED) AS thread_id,
            CAST(EVENT_ID AS SIGNED) AS event_id,
            CURRENT_SCHEMA AS database_name,
            CAST(ROUND(TIMER_WAIT / 1000000000, 3) AS DOUBLE) AS execution_time_ms,
            CAST(ROWS_SENT AS SIGNED) AS rows_sent,
            CAST(ROWS_EXAMINED AS SIGNED) AS rows_examined
         FROM performance_schema.{table}
         WHERE DIGEST = ?
               AND CURRENT_SCHEMA IS NOT NULL
               AND CURRENT_SCHEMA NOT IN ({excluded})
               AND TIMER_WAIT / 1000000000 > ?
         ORDER BY TIMER_WAIT DESC
         LIMIT ?",
        table = source.table(),
        excluded = placeholders(excluded),
    )
}

/// Wait time per digest and wait event, joined through the statement that nested the wait.
///
/// Binds: excluded databases, limit.
pub(super) fn build_wait_events_query(excluded: usize) -> String {
    format!(
        "SELECT
            s.DIGEST AS digest,
            LEFT(s.DIGEST_TEXT, 4000) AS query_text,
            s.CURRENT_SCHEMA AS database_name,
            w.EVENT_NAME AS wait_event_name,
            CASE
                WHEN w.EVENT_NAME LIKE 'wait/io/file/innodb/%' THEN 'InnoDB File IO'
                WHEN w.EVENT_NAME LIKE 'wait/io/file/sql/%' THEN 'SQL File IO'
                WHEN w.EVENT_NAME LIKE 'wait/io/socket/%' THEN 'Network IO'
                WHEN w.EVENT_NAME LIKE 'wait/io/table/%' THEN 'Table IO'
                WHEN w.EVENT_NAME LIKE 'wait/lock/table/%' THEN 'Table Lock'
                WHEN w.EVENT_NAME LIKE 'wait/lock/metadata/%' THEN 'Metadata Lock'
                WHEN w.EVENT_NAME LIKE 'wait/synch/mutex/%' THEN 'Mutex'
                WHEN w.EVENT_NAME LIKE 'wait/synch/cond/%' THEN 'Condition Wait'
                WHEN w.EVENT_NAME LIKE 'wait/synch/rwlock/%' THEN 'RW Lock'
                ELSE 'Other'
            END AS wait_category,
            CAST(COUNT(*) AS SIGNED) AS wait_event_count,
            CAST(ROUND(SUM(w.TIMER_WAIT) / 1000000000, 3) AS DOUBLE) AS total_wait_time_ms,
            CAST(ROUND(AVG(w.TIMER_WAIT) / 1000000000, 3) AS DOUBLE) AS avg_wait_time_ms,
            DATE_FORMAT(UTC_TIMESTAMP(), '%Y-%m-%dT%H:%i:%sZ') AS collection_timestamp
         FROM performance_schema.events_waits_history_long w
         JOIN performance_schema.events_statements_history_long s
           ON w.THREAD_ID = s.THREAD_ID
          AND w.NESTING_EVENT_ID = s.EVENT_ID
         WHERE s.DIGEST IS NOT NULL
               AND s.CURRENT_SCHEMA IS NOT NULL
               AND s.CURRENT_SCHEMA NOT IN ({})
               AND w.TIMER_WAIT IS NOT NULL
         GROUP BY s.DIGEST, s.DIGEST_TEXT, s.CURRENT_SCHEMA, w.EVENT_NAME
         ORDER BY total_wait_time_ms DESC
         LIMIT ?",
        placeholders(excluded)
    )
}

/// Lock waits with both sides resolved to transactions, threads, and current statements.
///
/// Binds: excluded databases, limit.
pub(super) fn build_blocking_sessions_query(excluded: usize) -> String {
    format!(
        "SELECT
            wt.PROCESSLIST_DB AS database_name,
            CAST(r.trx_id AS CHAR) AS blocked_txn_id,
            CAST(wt.THREAD_ID AS SIGNED) AS blocked_thread_id,
            CAST(r.trx_mysql_thread_id AS SIGNED) AS blocked_pid,
            COALESCE(LEFT(r.trx_query, 4000), '') AS blocked_query,
            esc_waiting.DIGEST AS blocked_digest,
            CAST(r.trx_state AS CHAR) AS blocked_status,
            CAST(b.trx_id AS CHAR) AS blocking_txn_id,
            CAST(bt.THREAD_ID AS SIGNED) AS blocking_thread_id,
            CAST(b.trx_mysql_thread_id AS SIGNED) AS blocking_pid,
            COALESCE(LEFT(b.trx_query, 4000), '') AS blocking_query,
            esc_blocking.DIGEST AS blocking_digest,
            CAST(b.trx_state AS CHAR) AS blocking_status,
            DATE_FORMAT(r.trx_wait_started, '%Y-%m-%dT%H:%i:%sZ') AS wait_started,
            DATE_FORMAT(UTC_TIMESTAMP(), '%Y-%m-%dT%H:%i:%sZ') AS collection_timestamp
         FROM performance_schema.data_lock_waits w
         JOIN performance_schema.threads wt ON wt.THREAD_ID = w.REQUESTING_THREAD_ID
         JOIN information_schema.innodb_trx r ON r.trx_mysql_thread_id = wt.PROCESSLIST_ID
         JOIN performance_schema.threads bt ON bt.THREAD_ID = w.BLOCKING_THREAD_ID
         JOIN information_schema.innodb_trx b ON b.trx_mysql_thread_id = bt.PROCESSLIST_ID
         LEFT JOIN performance_schema.events_statements_current esc_waiting
           ON esc_waiting.THREAD_ID = wt.THREAD_ID
         LEFT JOIN performance_schema.events_statements_current esc_blocking
           ON esc_blocking.THREAD_ID = bt.THREAD_ID
         WHERE wt.PROCESSLIST_DB IS NOT NULL
               AND wt.PROCESSLIST_DB NOT IN ({})
         ORDER BY r.trx_wait_started ASC
         LIMIT ?",
        placeholders(excluded)
    )
}
