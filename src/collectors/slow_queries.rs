use crate::collectors::config::{MAX_SLOW_QUERY_LIMIT, PipelineConfig};
use crate::error::CollectionError;
use crate::model::SlowQueryRecord;
use crate::source::{PerformanceSchema, SlowQueryFilter};
use tracing::{debug, instrument};

/// Digest statistics over the lookback window, slowest average elapsed time first.
///
/// The ranking decides which digests get per-statement and per-plan scrutiny downstream.
///
/// # Errors
///
/// Any query or connection error aborts the stage for this cycle; it is not retried.
#[instrument(
    skip(source, config),
    level = "info",
    err,
    fields(stage = "slow_queries")
)]
pub async fn collect_slow_queries<S>(
    source: &S,
    config: &PipelineConfig,
) -> Result<Vec<SlowQueryRecord>, CollectionError>
where
    S: PerformanceSchema + ?Sized,
{
    let filter = SlowQueryFilter {
        lookback_seconds: config.lookback_seconds,
        limit: config.slow_query_limit.clamp(1, MAX_SLOW_QUERY_LIMIT),
        excluded: &config.excluded_databases,
    };

    let mut records = source.slow_queries(filter).await?;
    rank(&mut records);
    dedup_digests(&mut records);

    debug!(digests = records.len(), "slow query digests collected");
    Ok(records)
}

/// Descending by average elapsed time; ties keep server order.
fn rank(records: &mut [SlowQueryRecord]) {
    records.sort_by(|a, b| b.avg_elapsed_time_ms.total_cmp(&a.avg_elapsed_time_ms));
}

/// The digest summary is already one row per digest and schema; keep the slowest per digest.
fn dedup_digests(records: &mut Vec<SlowQueryRecord>) {
    let mut seen = std::collections::HashSet::new();
    records.retain(|r| seen.insert(r.digest.clone()));
}

/// Digests in ranking order, for the statement correlator.
#[must_use]
pub fn hot_digests(records: &[SlowQueryRecord]) -> Vec<String> {
    records.iter().map(|r| r.digest.clone()).collect()
}
