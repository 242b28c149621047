//! Execution plan extraction for correlated statements.
//!
//! Each database group gets its own session so EXPLAIN resolves unqualified names in the schema
//! the statement ran in. Per-statement failures are logged and skipped; they never abort the
//! group or the stage.

pub mod json;
pub mod tabular;

use crate::collectors::config::ExplainFormat;
use crate::error::ExtractionError;
use crate::model::{PlanStep, QueryGroup, StatementOccurrence};
use crate::source::{ExplainOutput, ExplainSession, PerformanceSchema};
use tracing::{debug, instrument, warn};

/// Statement kinds EXPLAIN accepts.
const EXPLAINABLE_KEYWORDS: &[&str] = &["SELECT", "INSERT", "UPDATE", "DELETE", "WITH"];

/// Outcome of one extraction pass.
#[derive(Debug, Default)]
pub struct PlanExtraction {
    pub steps: Vec<PlanStep>,
    pub explained: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Explain every eligible statement and flatten the plans into steps.
///
/// Sessions are closed once their group is done, whatever happened to its statements.
#[instrument(
    skip(source, groups),
    level = "info",
    fields(stage = "execution_plans", groups = groups.len())
)]
pub async fn extract_plans<S>(
    source: &S,
    groups: &[QueryGroup],
    format: ExplainFormat,
) -> PlanExtraction
where
    S: PerformanceSchema + ?Sized,
{
    let mut extraction = PlanExtraction::default();

    for group in groups {
        let mut session = match source.open_explain_session(&group.database).await {
            Ok(session) => session,
            Err(e) => {
                warn!(database = %group.database, error = %e, "could not open explain session");
                extraction.failed += group.queries.len();
                continue;
            }
        };

        for occurrence in &group.queries {
            if !is_explainable(&occurrence.query_text) {
                debug!(identity = %occurrence.identity, "statement not explainable, skipping");
                extraction.skipped += 1;
                continue;
            }

            match explain_occurrence(session.as_mut(), occurrence, &group.database, format).await {
                Ok(steps) => {
                    extraction.explained += 1;
                    extraction.steps.extend(steps);
                }
                Err(e) => {
                    warn!(
                        database = %group.database,
                        digest = %occurrence.digest,
                        identity = %occurrence.identity,
                        error = %e,
                        "execution plan unavailable"
                    );
                    extraction.failed += 1;
                }
            }
        }

        session.close().await;
    }

    debug!(
        steps = extraction.steps.len(),
        explained = extraction.explained,
        skipped = extraction.skipped,
        failed = extraction.failed,
        "execution plans extracted"
    );
    extraction
}

async fn explain_occurrence(
    session: &mut dyn ExplainSession,
    occurrence: &StatementOccurrence,
    database: &str,
    format: ExplainFormat,
) -> Result<Vec<PlanStep>, ExtractionError> {
    let steps = match session.explain(&occurrence.query_text, format).await? {
        ExplainOutput::Json(raw) => json::flatten_json_plan(&raw)?,
        ExplainOutput::Tabular(rows) => tabular::flatten_tabular_plan(&rows),
    };

    Ok(steps
        .into_iter()
        .map(|step| PlanStep {
            identity: occurrence.identity,
            digest: occurrence.digest.clone(),
            database: database.to_string(),
            ..step
        })
        .collect())
}

/// Leading keyword is one EXPLAIN accepts, ignoring case and surrounding whitespace.
#[must_use]
pub fn is_supported_statement(text: &str) -> bool {
    let keyword: String = text
        .trim_start()
        .chars()
        .take_while(char::is_ascii_alphabetic)
        .collect();
    EXPLAINABLE_KEYWORDS
        .iter()
        .any(|k| k.eq_ignore_ascii_case(&keyword))
}

/// Supported, complete, and free of unbound `?` placeholders.
#[must_use]
pub fn is_explainable(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty()
        && is_supported_statement(text)
        && !text.contains('?')
        && !text.ends_with("...")
}
