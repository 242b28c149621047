use crate::collectors::stage::Stage;
use crate::collectors::util::ExcludedDatabases;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Hard upper bound on slow digests fetched per cycle.
pub const MAX_SLOW_QUERY_LIMIT: u32 = 100;
/// Hard upper bound on occurrences fetched per digest and statement table.
pub const MAX_INDIVIDUAL_QUERY_LIMIT: u32 = 50;
/// Hard upper bound on wait-event and blocking-session rows.
pub const MAX_EVENT_LIMIT: u32 = 200;

pub const DEFAULT_LOOKBACK_SECONDS: u64 = 30;
pub const DEFAULT_SLOW_QUERY_LIMIT: u32 = 20;
pub const DEFAULT_INDIVIDUAL_QUERY_LIMIT: u32 = 10;
pub const DEFAULT_RESPONSE_TIME_THRESHOLD_MS: u64 = 500;
pub const DEFAULT_EVENT_LIMIT: u32 = 50;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(30);

/// How EXPLAIN output is requested from the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExplainFormat {
    #[default]
    Json,
    Tabular,
}

impl FromStr for ExplainFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "tabular" | "traditional" => Ok(Self::Tabular),
            other => Err(format!("unknown explain format: {other}")),
        }
    }
}

impl fmt::Display for ExplainFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Tabular => f.write_str("tabular"),
        }
    }
}

/// Everything one collection cycle needs, validated and clamped once at startup.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub enabled_stages: HashSet<Stage>,
    pub lookback_seconds: u64,
    pub slow_query_limit: u32,
    pub individual_query_limit: u32,
    pub response_time_threshold_ms: u64,
    pub wait_event_limit: u32,
    pub blocking_session_limit: u32,
    pub excluded_databases: ExcludedDatabases,
    pub explain_format: ExplainFormat,
    pub query_timeout: Duration,
    pub stage_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled_stages: Stage::ALL
                .iter()
                .copied()
                .filter(|s| s.enabled_by_default())
                .collect(),
            lookback_seconds: DEFAULT_LOOKBACK_SECONDS,
            slow_query_limit: DEFAULT_SLOW_QUERY_LIMIT,
            individual_query_limit: DEFAULT_INDIVIDUAL_QUERY_LIMIT,
            response_time_threshold_ms: DEFAULT_RESPONSE_TIME_THRESHOLD_MS,
            wait_event_limit: DEFAULT_EVENT_LIMIT,
            blocking_session_limit: DEFAULT_EVENT_LIMIT,
            excluded_databases: ExcludedDatabases::default(),
            explain_format: ExplainFormat::default(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_enabled(mut self, stages: &[Stage]) -> Self {
        self.enabled_stages = stages.iter().copied().collect();
        self
    }

    /// Row limits are clamped here, before any SQL is built.
    #[must_use]
    pub fn with_limits(
        mut self,
        slow: u32,
        individual: u32,
        wait_events: u32,
        blocking: u32,
    ) -> Self {
        self.slow_query_limit = slow.clamp(1, MAX_SLOW_QUERY_LIMIT);
        self.individual_query_limit = individual.clamp(1, MAX_INDIVIDUAL_QUERY_LIMIT);
        self.wait_event_limit = wait_events.clamp(1, MAX_EVENT_LIMIT);
        self.blocking_session_limit = blocking.clamp(1, MAX_EVENT_LIMIT);
        self
    }

    #[must_use]
    pub fn with_excluded(mut self, excluded: ExcludedDatabases) -> Self {
        self.excluded_databases = excluded;
        self
    }

    #[must_use]
    pub fn is_enabled(&self, stage: Stage) -> bool {
        self.enabled_stages.contains(&stage)
    }
}
