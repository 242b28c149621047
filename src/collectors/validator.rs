//! Gatekeeper for the pipeline: performance_schema must be on, and the consumers and
//! instruments that feed statement and wait capture must be enabled (and timed).
//!
//! Nothing here changes server state; failures carry remediation SQL for the operator.

use crate::collectors::util::ServerVersion;
use crate::error::ValidationError;
use crate::source::queries::INSTRUMENT_PATTERNS;
use crate::source::{PerformanceSchema, SetupState};
use tracing::{debug, instrument, warn};

/// Consumers feeding the statement, wait, stage and transaction tables the pipeline reads.
pub const REQUIRED_CONSUMERS: &[&str] = &[
    "events_waits_current",
    "events_waits_history",
    "events_waits_history_long",
    "events_statements_current",
    "events_statements_history",
    "events_statements_history_long",
    "events_statements_cpu",
    "events_transactions_current",
    "events_stages_current",
];

/// Check that the server is instrumented for query performance collection.
///
/// # Errors
///
/// Returns the first failing condition: disabled performance_schema (or an unsupported
/// version), a disabled consumer, or an instrument that is not enabled and timed.
#[instrument(skip(source), level = "info", err)]
pub async fn validate<S>(source: &S) -> Result<ServerVersion, ValidationError>
where
    S: PerformanceSchema + ?Sized,
{
    let version = ServerVersion::parse(&source.server_version().await?);
    debug!(%version, "server version");

    if !source.performance_schema_enabled().await? {
        let err = if version.is_supported() {
            ValidationError::SchemaDisabled { version }
        } else {
            ValidationError::UnsupportedVersion { version }
        };
        warn!(error = %err, remediation = %err.remediation(), "performance_schema unavailable");
        return Err(err);
    }

    let consumers = source.consumers(REQUIRED_CONSUMERS).await?;
    if let Some(name) = first_disabled_consumer(REQUIRED_CONSUMERS, &consumers) {
        let err = ValidationError::ConsumerNotEnabled(name.to_string());
        warn!(error = %err, remediation = %err.remediation(), "consumer disabled");
        return Err(err);
    }

    let instruments = source.instruments(INSTRUMENT_PATTERNS).await?;
    if let Some(name) = first_disabled_instrument(&instruments) {
        let err = ValidationError::InstrumentNotEnabled(name.to_string());
        warn!(error = %err, remediation = %err.remediation(), "instrument disabled");
        return Err(err);
    }

    debug!(
        consumers = consumers.len(),
        instruments = instruments.len(),
        "performance_schema setup validated"
    );
    Ok(version)
}

/// First required consumer that is reported disabled or not reported at all.
#[must_use]
pub fn first_disabled_consumer<'a>(
    required: &[&'a str],
    reported: &[SetupState],
) -> Option<&'a str> {
    required.iter().copied().find(|name| {
        !reported
            .iter()
            .any(|state| state.name.eq_ignore_ascii_case(name) && state.enabled)
    })
}

/// First instrument that is disabled, or untimed where timing applies.
#[must_use]
pub fn first_disabled_instrument(reported: &[SetupState]) -> Option<&str> {
    reported
        .iter()
        .find(|state| !state.enabled || state.timed == Some(false))
        .map(|state| state.name.as_str())
}
