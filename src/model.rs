//! Records produced by one collection cycle. Nothing here outlives the cycle.

use std::fmt;

/// Identifies one statement execution on one server: `(thread id, event id)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventIdentity {
    pub thread_id: i64,
    pub event_id: i64,
}

impl EventIdentity {
    #[must_use]
    pub const fn new(thread_id: i64, event_id: i64) -> Self {
        Self {
            thread_id,
            event_id,
        }
    }
}

impl fmt::Display for EventIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.thread_id, self.event_id)
    }
}

/// Aggregated statistics for one digest over the lookback window.
#[derive(Clone, Debug, PartialEq)]
pub struct SlowQueryRecord {
    pub digest: String,
    pub query_text: String,
    pub database: String,
    pub execution_count: i64,
    pub avg_cpu_time_ms: f64,
    pub avg_elapsed_time_ms: f64,
    pub avg_rows_examined: f64,
    pub avg_rows_affected: f64,
    pub has_full_table_scan: bool,
    pub statement_type: String,
    pub last_execution_timestamp: String,
    pub collection_timestamp: String,
}

/// Which performance_schema statement table an occurrence was read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatementSource {
    Current,
    History,
    HistoryLong,
}

impl StatementSource {
    /// Lookup order; earlier sources win deduplication.
    pub const ALL: [Self; 3] = [Self::Current, Self::History, Self::HistoryLong];

    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Current => "events_statements_current",
            Self::History => "events_statements_history",
            Self::HistoryLong => "events_statements_history_long",
        }
    }
}

/// One concrete execution of a digest, as seen in a statement table.
#[derive(Clone, Debug, PartialEq)]
pub struct StatementOccurrence {
    pub digest: String,
    pub identity: EventIdentity,
    pub query_text: String,
    pub database: Option<String>,
    pub execution_time_ms: f64,
    pub rows_sent: i64,
    pub rows_examined: i64,
    pub source: StatementSource,
}

/// Occurrences sharing an originating database; EXPLAIN runs in that schema.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryGroup {
    pub database: String,
    pub queries: Vec<StatementOccurrence>,
}

/// One access step flattened out of a statement's execution plan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanStep {
    pub identity: EventIdentity,
    pub digest: String,
    pub database: String,
    pub step: u32,
    pub table: String,
    pub access_type: Option<String>,
    pub rows_examined_per_scan: Option<u64>,
    pub rows_produced_per_join: Option<u64>,
    pub filtered: Option<f64>,
    pub read_cost: Option<f64>,
    pub eval_cost: Option<f64>,
    pub prefix_cost: Option<f64>,
    pub data_read_per_join: Option<String>,
    pub using_index: Option<bool>,
    pub key: Option<String>,
    pub key_length: Option<String>,
    pub possible_keys: Option<String>,
    pub used_key_parts: Option<String>,
    pub reference: Option<String>,
    pub query_cost: String,
}

/// Wait time attributed to one digest and wait event.
#[derive(Clone, Debug, PartialEq)]
pub struct WaitEventRecord {
    pub digest: String,
    pub query_text: String,
    pub database: String,
    pub wait_event_name: String,
    pub wait_category: String,
    pub wait_event_count: i64,
    pub total_wait_time_ms: f64,
    pub avg_wait_time_ms: f64,
    pub collection_timestamp: String,
}

/// A transaction waiting on a lock held by another transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockingPair {
    pub database: String,
    pub blocked_txn_id: String,
    pub blocked_thread_id: i64,
    pub blocked_pid: i64,
    pub blocked_query: String,
    pub blocked_digest: Option<String>,
    pub blocked_status: String,
    pub blocking_txn_id: String,
    pub blocking_thread_id: i64,
    pub blocking_pid: i64,
    pub blocking_query: String,
    pub blocking_digest: Option<String>,
    pub blocking_status: String,
    pub wait_started: String,
    pub collection_timestamp: String,
}
