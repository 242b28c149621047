//! Data access for the pipeline.
//!
//! Every stage talks to the server through [`PerformanceSchema`], so cycles can be driven by
//! the sqlx-backed [`MySqlSource`] in production and by an in-memory fake in tests.

mod mysql;
pub mod queries;

pub use mysql::MySqlSource;

use crate::collectors::config::ExplainFormat;
use crate::collectors::plans::tabular::TabularRow;
use crate::collectors::util::ExcludedDatabases;
use crate::error::CollectionError;
use crate::model::{
    BlockingPair, SlowQueryRecord, StatementOccurrence, StatementSource, WaitEventRecord,
};
use futures::future::BoxFuture;

/// Enabled/timed state of one `setup_consumers` or `setup_instruments` row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupState {
    pub name: String,
    pub enabled: bool,
    /// `None` where timing does not apply (consumers, memory instruments).
    pub timed: Option<bool>,
}

impl SetupState {
    /// Parse performance_schema's `YES`/`NO` flags.
    #[must_use]
    pub fn from_flags(name: String, enabled: &str, timed: Option<&str>) -> Self {
        Self {
            name,
            enabled: enabled.eq_ignore_ascii_case("YES"),
            timed: timed.map(|t| t.eq_ignore_ascii_case("YES")),
        }
    }
}

/// Filter for the digest summary lookup.
#[derive(Clone, Copy, Debug)]
pub struct SlowQueryFilter<'a> {
    pub lookback_seconds: u64,
    pub limit: u32,
    pub excluded: &'a ExcludedDatabases,
}

/// Filter applied to each per-digest statement table lookup.
#[derive(Clone, Copy, Debug)]
pub struct OccurrenceFilter<'a> {
    pub response_time_threshold_ms: u64,
    pub limit: u32,
    pub excluded: &'a ExcludedDatabases,
}

/// Raw EXPLAIN output in the requested format.
#[derive(Clone, Debug, PartialEq)]
pub enum ExplainOutput {
    Json(String),
    Tabular(Vec<TabularRow>),
}

/// A connection bound to one schema, used to EXPLAIN statements in their own context.
pub trait ExplainSession: Send {
    fn explain<'a>(
        &'a mut self,
        statement: &'a str,
        format: ExplainFormat,
    ) -> BoxFuture<'a, Result<ExplainOutput, CollectionError>>;

    /// Release the underlying connection.
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;
}

pub trait PerformanceSchema: Send + Sync {
    fn server_version(&self) -> BoxFuture<'_, Result<String, CollectionError>>;

    fn performance_schema_enabled(&self) -> BoxFuture<'_, Result<bool, CollectionError>>;

    fn consumers<'a>(
        &'a self,
        names: &'a [&'static str],
    ) -> BoxFuture<'a, Result<Vec<SetupState>, CollectionError>>;

    fn instruments<'a>(
        &'a self,
        patterns: &'a [&'static str],
    ) -> BoxFuture<'a, Result<Vec<SetupState>, CollectionError>>;

    fn slow_queries<'a>(
        &'a self,
        filter: SlowQueryFilter<'a>,
    ) -> BoxFuture<'a, Result<Vec<SlowQueryRecord>, CollectionError>>;

    fn statement_occurrences<'a>(
        &'a self,
        source: StatementSource,
        digest: &'a str,
        filter: OccurrenceFilter<'a>,
    ) -> BoxFuture<'a, Result<Vec<StatementOccurrence>, CollectionError>>;

    fn open_explain_session<'a>(
        &'a self,
        database: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn ExplainSession>, CollectionError>>;

    fn wait_events<'a>(
        &'a self,
        excluded: &'a ExcludedDatabases,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<WaitEventRecord>, CollectionError>>;

    fn blocking_sessions<'a>(
        &'a self,
        excluded: &'a ExcludedDatabases,
        limit: u32,
    ) -> BoxFuture<'a, Result<Vec<BlockingPair>, CollectionError>>;
}
