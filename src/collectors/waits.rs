use crate::collectors::config::{MAX_EVENT_LIMIT, PipelineConfig};
use crate::error::CollectionError;
use crate::model::WaitEventRecord;
use crate::source::PerformanceSchema;
use tracing::{debug, instrument};

/// Wait time per digest and wait event, heaviest total first.
///
/// # Errors
///
/// A failing query aborts this stage only.
#[instrument(
    skip(source, config),
    level = "info",
    err,
    fields(stage = "wait_events")
)]
pub async fn collect_wait_events<S>(
    source: &S,
    config: &PipelineConfig,
) -> Result<Vec<WaitEventRecord>, CollectionError>
where
    S: PerformanceSchema + ?Sized,
{
    let limit = config.wait_event_limit.clamp(1, MAX_EVENT_LIMIT);
    let mut records = source
        .wait_events(&config.excluded_databases, limit)
        .await?;

    // Rows with no measurable wait carry nothing to correlate.
    records.retain(|r| r.wait_event_count > 0);
    records.sort_by(|a, b| b.total_wait_time_ms.total_cmp(&a.total_wait_time_ms));

    debug!(records = records.len(), "wait events collected");
    Ok(records)
}
