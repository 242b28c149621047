use crate::{
    cli::{actions::Action, commands},
    collectors::{
        Stage,
        config::{
            DEFAULT_EVENT_LIMIT, DEFAULT_INDIVIDUAL_QUERY_LIMIT, DEFAULT_LOOKBACK_SECONDS,
            DEFAULT_RESPONSE_TIME_THRESHOLD_MS, DEFAULT_SLOW_QUERY_LIMIT, ExplainFormat,
            PipelineConfig,
        },
        util::ExcludedDatabases,
    },
};
use anyhow::{Result, anyhow};
use clap::ArgMatches;
use secrecy::SecretString;
use std::time::Duration;
use tracing::{info, warn};

/// # Errors
///
/// Returns an error if required arguments are missing or malformed
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let dsn = SecretString::from(
        matches
            .get_one::<String>("dsn")
            .cloned()
            .ok_or_else(|| anyhow!("DSN is required. Please provide it using the --dsn flag."))?,
    );

    // Parsed once; every stage shares the same typed set.
    let excluded = ExcludedDatabases::from_json(
        matches
            .get_one::<String>("excluded-databases")
            .map_or("", String::as_str),
    )?;
    let listed: Vec<&str> = excluded.iter().filter(|db| !db.is_empty()).collect();
    info!(excluded = ?listed, "excluded databases");

    let explain_format: ExplainFormat = matches
        .get_one::<String>("explain-format")
        .map_or(Ok(ExplainFormat::default()), |s| s.parse())
        .map_err(|e| anyhow!(e))?;

    let u32_arg =
        |name: &str, default: u32| matches.get_one::<u32>(name).copied().unwrap_or(default);
    let u64_arg =
        |name: &str, default: u64| matches.get_one::<u64>(name).copied().unwrap_or(default);

    let enabled = get_enabled_stages(matches);
    for stage in &enabled {
        if let Some(upstream) = stage.depends_on().filter(|s| !enabled.contains(s)) {
            warn!(
                %stage,
                %upstream,
                "stage is enabled but its input stage is disabled; it will be skipped"
            );
        }
    }

    let mut config = PipelineConfig::new()
        .with_enabled(&enabled)
        .with_limits(
            u32_arg("slow-query-limit", DEFAULT_SLOW_QUERY_LIMIT),
            u32_arg("individual-query-limit", DEFAULT_INDIVIDUAL_QUERY_LIMIT),
            u32_arg("wait-event-limit", DEFAULT_EVENT_LIMIT),
            u32_arg("blocking-session-limit", DEFAULT_EVENT_LIMIT),
        )
        .with_excluded(excluded);
    config.lookback_seconds = u64_arg("lookback-seconds", DEFAULT_LOOKBACK_SECONDS);
    config.response_time_threshold_ms = u64_arg(
        "response-time-threshold-ms",
        DEFAULT_RESPONSE_TIME_THRESHOLD_MS,
    );
    config.query_timeout = Duration::from_secs(u64_arg("query-timeout-seconds", 5));
    config.stage_timeout = Duration::from_secs(u64_arg("stage-timeout-seconds", 30));
    config.explain_format = explain_format;

    let interval = Some(u64_arg("interval-seconds", 0))
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    Ok(Action::Run {
        dsn,
        config,
        remote_monitoring: matches.get_flag("remote-monitoring"),
        interval,
        metrics_textfile: commands::metrics_textfile(matches),
    })
}

/// Stages enabled after applying toggles, in execution order.
#[must_use]
pub fn get_enabled_stages(matches: &ArgMatches) -> Vec<Stage> {
    Stage::ALL
        .iter()
        .copied()
        .filter(|stage| {
            let name = stage.name();
            let enable_flag = format!("collector.{name}");
            let disable_flag = format!("no-collector.{name}");

            if matches.get_flag(&disable_flag) {
                return false;
            }

            if matches.get_flag(&enable_flag) {
                return true;
            }

            stage.enabled_by_default()
        })
        .collect()
}
