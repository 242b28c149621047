//! Error taxonomy for a collection cycle.
//!
//! - [`ValidationError`] is fatal to the whole cycle.
//! - [`CollectionError`] is fatal to the stage that raised it only.
//! - [`ExtractionError`] is fatal to a single statement's plan only.

use crate::collectors::util::ServerVersion;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single SQL round trip, tagged with the query that produced it.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("query `{query}` failed: {source}")]
    Query {
        query: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("query `{query}` timed out after {after:?}")]
    Timeout {
        query: &'static str,
        after: Duration,
    },

    #[error("could not decode result of `{query}`: {message}")]
    Decode {
        query: &'static str,
        message: String,
    },

    #[error("could not connect to database `{database}`: {source}")]
    Connect {
        database: String,
        #[source]
        source: sqlx::Error,
    },
}

impl CollectionError {
    /// Name of the query (or connection target) that failed.
    #[must_use]
    pub fn query(&self) -> &str {
        match self {
            Self::Query { query, .. }
            | Self::Timeout { query, .. }
            | Self::Decode { query, .. } => query,
            Self::Connect { database, .. } => database,
        }
    }
}

/// The server is not instrumented the way the pipeline needs.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("performance_schema is disabled on MySQL {version}")]
    SchemaDisabled { version: ServerVersion },

    #[error("MySQL {version} is not supported; version 8.0 or later is required")]
    UnsupportedVersion { version: ServerVersion },

    #[error("performance_schema consumer `{0}` is not enabled")]
    ConsumerNotEnabled(String),

    #[error("performance_schema instrument `{0}` is not enabled and timed")]
    InstrumentNotEnabled(String),

    #[error("could not inspect performance_schema setup: {0}")]
    Inspect(#[from] CollectionError),
}

impl ValidationError {
    /// Operator-facing instructions to fix the reported condition.
    #[must_use]
    pub fn remediation(&self) -> String {
        match self {
            Self::SchemaDisabled { version } => schema_disabled_remediation(*version),
            Self::UnsupportedVersion { version } => format!(
                "MySQL {version} lacks the statement CPU and lock-wait views this collector reads. \
                 Upgrade to MySQL 8.0 or later."
            ),
            Self::ConsumerNotEnabled(name) => format!(
                "UPDATE performance_schema.setup_consumers SET ENABLED = 'YES' WHERE NAME = '{name}';\n\
                 To persist across restarts add `performance-schema-consumer-{}=ON` to my.cnf.",
                name.replace('_', "-")
            ),
            Self::InstrumentNotEnabled(name) => format!(
                "UPDATE performance_schema.setup_instruments SET ENABLED = 'YES', TIMED = 'YES' WHERE NAME = '{name}';\n\
                 To persist across restarts add `performance-schema-instrument='{name}=ON'` to my.cnf."
            ),
            Self::Inspect(e) => format!(
                "Verify the monitoring user can SELECT from performance_schema ({})",
                e.query()
            ),
        }
    }
}

/// `performance_schema` is read-only at runtime on every version; what differs is whether it can
/// be persisted from SQL (`SET PERSIST_ONLY` and `RESTART` arrived in 8.0.11).
fn schema_disabled_remediation(version: ServerVersion) -> String {
    let my_cnf = "add `performance_schema=ON` under the [mysqld] section of my.cnf \
                  (and remove any --skip-performance-schema option)";
    match (version.major, version.minor) {
        (8, 0) if version.patch < 11 => format!(
            "performance_schema cannot be enabled at runtime on MySQL {version}. \
             To enable it, {my_cnf}, then restart the server."
        ),
        (8, 0) => format!(
            "performance_schema cannot be enabled at runtime on MySQL {version}. Run \
             `SET PERSIST_ONLY performance_schema = ON;` followed by `RESTART;`, or {my_cnf}."
        ),
        _ => format!(
            "performance_schema is enabled by default on MySQL {version}, so it was turned off \
             explicitly. Run `RESET PERSIST performance_schema;` if it was persisted off, or \
             `SET PERSIST_ONLY performance_schema = ON;`, then `RESTART;`. Alternatively, {my_cnf}."
        ),
    }
}

/// A statement's EXPLAIN output could not be turned into plan steps.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("malformed EXPLAIN JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("EXPLAIN JSON has no query_block at its root")]
    MissingQueryBlock,

    #[error(transparent)]
    Explain(#[from] CollectionError),
}

/// Errors surfaced by [`crate::pipeline::run_cycle`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("performance_schema validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("stage `{stage}` failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: CollectionError,
    },

    #[error("publishing {event_type} failed: {message}")]
    Emit {
        event_type: &'static str,
        message: String,
    },
}
