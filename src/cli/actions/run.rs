use crate::cli::actions::Action;
use crate::collectors::metrics::StageMetrics;
use crate::collectors::util::ConnectionTarget;
use crate::emitter::{Emitter, Entity, JsonLinesEmitter};
use crate::error::PipelineError;
use crate::pipeline::{CycleContext, run_cycle};
use crate::source::{MySqlSource, PerformanceSchema};
use anyhow::{Context, Result};
use sqlx::mysql::MySqlPoolOptions;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Handle the run action
///
/// # Errors
///
/// Returns an error if the database is unreachable, a single cycle fails validation, or the
/// emitter output breaks.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Run {
        dsn,
        config,
        remote_monitoring,
        interval,
        metrics_textfile,
    } = action;

    let target = ConnectionTarget::from_dsn(&dsn)?;
    let pool = MySqlPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(config.query_timeout)
        .connect_with(target.options.clone())
        .await
        .with_context(|| {
            format!(
                "failed to connect to MySQL at {}:{}",
                target.host, target.port
            )
        })?;

    info!(host = %target.host, port = target.port, "connected");

    let entity = Entity::new(&target.host, target.port, remote_monitoring);
    let source = MySqlSource::new(pool.clone(), target, config.query_timeout);
    let metrics = StageMetrics::new()?;
    let ctx = CycleContext {
        config: &config,
        entity: &entity,
        metrics: &metrics,
    };
    let mut emitter = JsonLinesEmitter::new(std::io::stdout());

    let result = match interval {
        None => {
            run_once(
                &source,
                &mut emitter,
                &ctx,
                metrics_textfile.as_deref(),
                shutdown_signal(),
            )
            .await
        }
        Some(every) => {
            run_every(
                every,
                &source,
                &mut emitter,
                &ctx,
                metrics_textfile.as_deref(),
                shutdown_signal(),
            )
            .await
        }
    };

    pool.close().await;
    result
}

/// Resolves on the first ctrl-c. If the handler cannot be installed it never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

async fn run_once<S, E, F>(
    source: &S,
    emitter: &mut E,
    ctx: &CycleContext<'_>,
    textfile: Option<&Path>,
    shutdown: F,
) -> Result<()>
where
    S: PerformanceSchema + ?Sized,
    E: Emitter + ?Sized,
    F: Future<Output = ()>,
{
    let outcome = tokio::select! {
        outcome = run_cycle(source, emitter, ctx) => outcome,
        () = shutdown => {
            info!("interrupted, abandoning cycle");
            write_metrics(ctx.metrics, textfile);
            return Ok(());
        }
    };
    write_metrics(ctx.metrics, textfile);

    let report = outcome?;
    if report.failures() > 0 {
        warn!(
            failures = report.failures(),
            "cycle finished with failed stages"
        );
    }
    Ok(())
}

/// Run a cycle on every tick until `shutdown` resolves.
///
/// `shutdown` is raced against both the wait for the next tick and the cycle in flight, so an
/// interrupt during a cycle drops its pending queries instead of waiting for them.
///
/// # Errors
///
/// Returns an error if a cycle fails for any reason other than validation.
pub async fn run_every<S, E, F>(
    every: Duration,
    source: &S,
    emitter: &mut E,
    ctx: &CycleContext<'_>,
    textfile: Option<&Path>,
    shutdown: F,
) -> Result<()>
where
    S: PerformanceSchema + ?Sized,
    E: Emitter + ?Sized,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            () = &mut shutdown => {
                info!("shutting down");
                return Ok(());
            }
        }

        let outcome = tokio::select! {
            outcome = run_cycle(source, &mut *emitter, ctx) => outcome,
            () = &mut shutdown => {
                info!("shutting down, abandoning in-flight cycle");
                write_metrics(ctx.metrics, textfile);
                return Ok(());
            }
        };
        write_metrics(ctx.metrics, textfile);

        match outcome {
            Ok(report) if report.failures() > 0 => {
                warn!(
                    failures = report.failures(),
                    "cycle finished with failed stages"
                );
            }
            Ok(_) => {}
            // The operator may fix instrumentation between cycles.
            Err(PipelineError::Validation(e)) => {
                error!(
                    error = %e,
                    remediation = %e.remediation(),
                    "validation failed, retrying next cycle"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn write_metrics(metrics: &StageMetrics, textfile: Option<&Path>) {
    let Some(path) = textfile else {
        return;
    };
    if let Err(e) = metrics.write_textfile(path) {
        warn!(path = %path.display(), error = %e, "failed to write metrics textfile");
    }
}
