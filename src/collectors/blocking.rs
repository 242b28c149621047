use crate::collectors::config::{MAX_EVENT_LIMIT, PipelineConfig};
use crate::error::CollectionError;
use crate::model::BlockingPair;
use crate::source::PerformanceSchema;
use std::collections::HashSet;
use tracing::{debug, instrument};

/// Transactions currently waiting on locks, paired with the transaction holding them.
///
/// # Errors
///
/// A failing query aborts this stage only.
#[instrument(
    skip(source, config),
    level = "info",
    err,
    fields(stage = "blocking_sessions")
)]
pub async fn collect_blocking_sessions<S>(
    source: &S,
    config: &PipelineConfig,
) -> Result<Vec<BlockingPair>, CollectionError>
where
    S: PerformanceSchema + ?Sized,
{
    let limit = config.blocking_session_limit.clamp(1, MAX_EVENT_LIMIT);
    let pairs = source
        .blocking_sessions(&config.excluded_databases, limit)
        .await?;

    let pairs = dedup_pairs(pairs);
    debug!(pairs = pairs.len(), "blocking sessions collected");
    Ok(pairs)
}

/// `data_lock_waits` has one row per contended lock; report each transaction pair once.
#[must_use]
pub fn dedup_pairs(pairs: Vec<BlockingPair>) -> Vec<BlockingPair> {
    let mut seen = HashSet::with_capacity(pairs.len());
    pairs
        .into_iter()
        .filter(|p| seen.insert((p.blocked_txn_id.clone(), p.blocking_txn_id.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(blocked: &str, blocking: &str) -> BlockingPair {
        BlockingPair {
            database: "shop".to_string(),
            blocked_txn_id: blocked.to_string(),
            blocked_thread_id: 48,
            blocked_pid: 9,
            blocked_query: "UPDATE orders SET status = 'paid' WHERE id = 1".to_string(),
            blocked_digest: Some("d-blocked".to_string()),
            blocked_status: "LOCK WAIT".to_string(),
            blocking_txn_id: blocking.to_string(),
            blocking_thread_id: 47,
            blocking_pid: 8,
            blocking_query: String::new(),
            blocking_digest: None,
            blocking_status: "RUNNING".to_string(),
            wait_started: "2026-01-01T00:00:00Z".to_string(),
            collection_timestamp: "2026-01-01T00:00:05Z".to_string(),
        }
    }

    #[test]
    fn test_one_row_per_transaction_pair() {
        let pairs = vec![pair("101", "100"), pair("101", "100"), pair("102", "100")];
        let unique = dedup_pairs(pairs);
        let ids: Vec<(&str, &str)> = unique
            .iter()
            .map(|p| (p.blocked_txn_id.as_str(), p.blocking_txn_id.as_str()))
            .collect();
        assert_eq!(ids, vec![("101", "100"), ("102", "100")]);
    }
}
