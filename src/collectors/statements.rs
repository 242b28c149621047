//! Statement correlation: turn hot digests into concrete statement occurrences.
//!
//! For each digest the three statement tables are queried (current, history, history_long).
//! Results are concatenated in that order, deduplicated by event identity keeping the first
//! occurrence, and partitioned by originating database so EXPLAIN can run in the right schema.

use crate::collectors::config::MAX_INDIVIDUAL_QUERY_LIMIT;
use crate::error::CollectionError;
use crate::model::{EventIdentity, QueryGroup, StatementOccurrence, StatementSource};
use crate::source::{OccurrenceFilter, PerformanceSchema};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument, trace};

/// Correlate hot digests with their recent executions.
///
/// An empty digest list returns immediately without touching the server. The per-digest
/// limit is capped at [`MAX_INDIVIDUAL_QUERY_LIMIT`] rows per statement table.
///
/// # Errors
///
/// The first failing lookup aborts the whole correlation; no partial result is returned.
#[instrument(
    skip(source, digests, filter),
    level = "info",
    err,
    fields(stage = "individual_queries", digests = digests.len())
)]
pub async fn correlate_statements<S>(
    source: &S,
    digests: &[String],
    filter: OccurrenceFilter<'_>,
) -> Result<Vec<QueryGroup>, CollectionError>
where
    S: PerformanceSchema + ?Sized,
{
    if digests.is_empty() {
        return Ok(Vec::new());
    }

    let filter = OccurrenceFilter {
        limit: filter.limit.clamp(1, MAX_INDIVIDUAL_QUERY_LIMIT),
        ..filter
    };

    let mut occurrences = Vec::new();
    for digest in digests {
        // Lookups are independent; concatenation below fixes precedence regardless of
        // which finishes first.
        let (current, history, history_long) = futures::try_join!(
            source.statement_occurrences(StatementSource::Current, digest, filter),
            source.statement_occurrences(StatementSource::History, digest, filter),
            source.statement_occurrences(StatementSource::HistoryLong, digest, filter),
        )?;

        trace!(
            digest = %digest,
            current = current.len(),
            history = history.len(),
            history_long = history_long.len(),
            "statement lookups"
        );

        occurrences.extend(current);
        occurrences.extend(history);
        occurrences.extend(history_long);
    }

    let unique = dedup_by_identity(occurrences);
    let groups = group_by_database(unique);

    debug!(
        groups = groups.len(),
        statements = groups.iter().map(|g| g.queries.len()).sum::<usize>(),
        "statements correlated"
    );
    Ok(groups)
}

/// Keep the first occurrence of each event identity, preserving order.
#[must_use]
pub fn dedup_by_identity(occurrences: Vec<StatementOccurrence>) -> Vec<StatementOccurrence> {
    let mut seen: HashSet<EventIdentity> = HashSet::with_capacity(occurrences.len());
    occurrences
        .into_iter()
        .filter(|o| seen.insert(o.identity))
        .collect()
}

/// Partition by originating database in first-seen order; statements without one are dropped.
#[must_use]
pub fn group_by_database(occurrences: Vec<StatementOccurrence>) -> Vec<QueryGroup> {
    let mut groups: Vec<QueryGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for occurrence in occurrences {
        let Some(database) = occurrence
            .database
            .as_deref()
            .map(str::trim)
            .filter(|db| !db.is_empty())
            .map(ToString::to_string)
        else {
            continue;
        };

        if let Some(group) = index.get(&database).and_then(|&i| groups.get_mut(i)) {
            group.queries.push(occurrence);
        } else {
            index.insert(database.clone(), groups.len());
            groups.push(QueryGroup {
                database,
                queries: vec![occurrence],
            });
        }
    }

    groups
}
