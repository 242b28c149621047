//! One collection cycle.
//!
//! Validation gates everything. Slow queries feed statement correlation, which feeds plan
//! extraction; wait events and blocking sessions run regardless of how that chain fared. Every
//! stage publishes its own stream as soon as it finishes.

use crate::collectors::Stage;
use crate::collectors::blocking::collect_blocking_sessions;
use crate::collectors::config::{MAX_INDIVIDUAL_QUERY_LIMIT, PipelineConfig};
use crate::collectors::metrics::StageMetrics;
use crate::collectors::plans::extract_plans;
use crate::collectors::slow_queries::{collect_slow_queries, hot_digests};
use crate::collectors::statements::correlate_statements;
use crate::collectors::util::ServerVersion;
use crate::collectors::validator::validate;
use crate::collectors::waits::collect_wait_events;
use crate::emitter::{Emitter, Entity, MetricRecord, publish_records};
use crate::error::{CollectionError, PipelineError};
use crate::model::{QueryGroup, StatementOccurrence};
use crate::source::{OccurrenceFilter, PerformanceSchema};
use std::future::Future;
use tracing::{debug, info, instrument, warn};

/// Inputs shared by every stage of a cycle.
pub struct CycleContext<'a> {
    pub config: &'a PipelineConfig,
    pub entity: &'a Entity,
    pub metrics: &'a StageMetrics,
}

#[derive(Debug)]
pub enum StageStatus {
    Completed { records: usize },
    Disabled,
    Skipped { reason: &'static str },
    Failed(PipelineError),
}

#[derive(Debug)]
pub struct CycleReport {
    pub server_version: ServerVersion,
    pub stages: Vec<(Stage, StageStatus)>,
}

impl CycleReport {
    #[must_use]
    pub fn status(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, status)| status)
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.stages
            .iter()
            .filter(|(_, status)| matches!(status, StageStatus::Failed(_)))
            .count()
    }

    #[must_use]
    pub fn records(&self) -> usize {
        self.stages
            .iter()
            .map(|(_, status)| match status {
                StageStatus::Completed { records } => *records,
                _ => 0,
            })
            .sum()
    }
}

/// Run one cycle against `source`, publishing to `emitter`.
///
/// # Errors
///
/// Returns an error if validation fails (nothing else runs) or the emitter rejects a batch.
/// Stage failures are recorded in the report instead.
#[instrument(skip_all, level = "info", fields(entity = %ctx.entity))]
pub async fn run_cycle<S, E>(
    source: &S,
    emitter: &mut E,
    ctx: &CycleContext<'_>,
) -> Result<CycleReport, PipelineError>
where
    S: PerformanceSchema + ?Sized,
    E: Emitter + ?Sized,
{
    let config = ctx.config;
    ctx.metrics.increment_cycles();

    let timer = ctx.metrics.start_stage("validation");
    let server_version = match validate(source).await {
        Ok(version) => {
            timer.success();
            version
        }
        Err(e) => {
            timer.error();
            return Err(e.into());
        }
    };

    let mut report = CycleReport {
        server_version,
        stages: Vec::with_capacity(Stage::ALL.len()),
    };

    // Slow queries
    let slow = if config.is_enabled(Stage::SlowQueries) {
        match run_stage(
            Stage::SlowQueries,
            ctx,
            collect_slow_queries(source, config),
        )
        .await
        {
            Ok(records) => {
                let published = emit(emitter, ctx, &records)?;
                report.push(
                    Stage::SlowQueries,
                    StageStatus::Completed { records: published },
                );
                Some(records)
            }
            Err(e) => {
                report.push(Stage::SlowQueries, StageStatus::Failed(e));
                None
            }
        }
    } else {
        report.push(Stage::SlowQueries, StageStatus::Disabled);
        None
    };

    // Individual queries
    let groups: Option<Vec<QueryGroup>> = if !config.is_enabled(Stage::IndividualQueries) {
        report.push(Stage::IndividualQueries, StageStatus::Disabled);
        None
    } else if let Some(slow) = slow {
        let digests = hot_digests(&slow);
        if digests.is_empty() {
            report.push(
                Stage::IndividualQueries,
                StageStatus::Skipped {
                    reason: "no slow query digests",
                },
            );
            None
        } else {
            let filter = OccurrenceFilter {
                response_time_threshold_ms: config.response_time_threshold_ms,
                limit: config
                    .individual_query_limit
                    .clamp(1, MAX_INDIVIDUAL_QUERY_LIMIT),
                excluded: &config.excluded_databases,
            };
            match run_stage(
                Stage::IndividualQueries,
                ctx,
                correlate_statements(source, &digests, filter),
            )
            .await
            {
                Ok(groups) => {
                    let occurrences: Vec<StatementOccurrence> = groups
                        .iter()
                        .flat_map(|g| g.queries.iter().cloned())
                        .collect();
                    let published = emit(emitter, ctx, &occurrences)?;
                    report.push(
                        Stage::IndividualQueries,
                        StageStatus::Completed { records: published },
                    );
                    Some(groups)
                }
                Err(e) => {
                    report.push(Stage::IndividualQueries, StageStatus::Failed(e));
                    None
                }
            }
        }
    } else {
        report.push(
            Stage::IndividualQueries,
            StageStatus::Skipped {
                reason: "slow_queries did not run",
            },
        );
        None
    };

    // Execution plans
    if config.is_enabled(Stage::ExecutionPlans) {
        match groups {
            Some(groups) if !groups.is_empty() => {
                let plans = async {
                    Ok::<_, CollectionError>(
                        extract_plans(source, &groups, config.explain_format).await,
                    )
                };
                match run_stage(Stage::ExecutionPlans, ctx, plans).await {
                    Ok(extraction) => {
                        if extraction.failed > 0 {
                            warn!(
                                failed = extraction.failed,
                                explained = extraction.explained,
                                "some execution plans could not be extracted"
                            );
                        }
                        let published = emit(emitter, ctx, &extraction.steps)?;
                        report.push(
                            Stage::ExecutionPlans,
                            StageStatus::Completed { records: published },
                        );
                    }
                    Err(e) => report.push(Stage::ExecutionPlans, StageStatus::Failed(e)),
                }
            }
            Some(_) => report.push(
                Stage::ExecutionPlans,
                StageStatus::Skipped {
                    reason: "no correlated statements",
                },
            ),
            None => report.push(
                Stage::ExecutionPlans,
                StageStatus::Skipped {
                    reason: "individual_queries did not run",
                },
            ),
        }
    } else {
        report.push(Stage::ExecutionPlans, StageStatus::Disabled);
    }

    // Wait events
    if config.is_enabled(Stage::WaitEvents) {
        match run_stage(Stage::WaitEvents, ctx, collect_wait_events(source, config)).await {
            Ok(records) => {
                let published = emit(emitter, ctx, &records)?;
                report.push(
                    Stage::WaitEvents,
                    StageStatus::Completed { records: published },
                );
            }
            Err(e) => report.push(Stage::WaitEvents, StageStatus::Failed(e)),
        }
    } else {
        report.push(Stage::WaitEvents, StageStatus::Disabled);
    }

    // Blocking sessions
    if config.is_enabled(Stage::BlockingSessions) {
        match run_stage(
            Stage::BlockingSessions,
            ctx,
            collect_blocking_sessions(source, config),
        )
        .await
        {
            Ok(pairs) => {
                let published = emit(emitter, ctx, &pairs)?;
                report.push(
                    Stage::BlockingSessions,
                    StageStatus::Completed { records: published },
                );
            }
            Err(e) => report.push(Stage::BlockingSessions, StageStatus::Failed(e)),
        }
    } else {
        report.push(Stage::BlockingSessions, StageStatus::Disabled);
    }

    emitter.flush().map_err(|e| PipelineError::Emit {
        event_type: "flush",
        message: format!("{e:#}"),
    })?;

    info!(
        version = %report.server_version,
        records = report.records(),
        failures = report.failures(),
        "collection cycle finished"
    );
    Ok(report)
}

impl CycleReport {
    fn push(&mut self, stage: Stage, status: StageStatus) {
        debug!(%stage, ?status, "stage finished");
        self.stages.push((stage, status));
    }
}

/// Bound a stage by the stage timeout and record its outcome.
async fn run_stage<T, F>(
    stage: Stage,
    ctx: &CycleContext<'_>,
    fut: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, CollectionError>>,
{
    let timer = ctx.metrics.start_stage(stage.name());
    let timeout = ctx.config.stage_timeout;

    let result = match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollectionError::Timeout {
            query: stage.name(),
            after: timeout,
        }),
    };

    match result {
        Ok(value) => {
            timer.success();
            Ok(value)
        }
        Err(source) => {
            timer.error();
            warn!(%stage, error = %source, "stage failed");
            Err(PipelineError::Stage {
                stage: stage.name(),
                source,
            })
        }
    }
}

fn emit<R, E>(
    emitter: &mut E,
    ctx: &CycleContext<'_>,
    records: &[R],
) -> Result<usize, PipelineError>
where
    R: MetricRecord,
    E: Emitter + ?Sized,
{
    let published =
        publish_records(emitter, ctx.entity, records).map_err(|e| PipelineError::Emit {
            event_type: R::EVENT_TYPE,
            message: format!("{e:#}"),
        })?;
    ctx.metrics.record_emitted(R::EVENT_TYPE, published);
    Ok(published)
}
