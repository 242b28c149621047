//! Self-monitoring for the pipeline, exposed in the prometheus text format.

use anyhow::{Context, Result};
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct StageMetrics {
    registry: Registry,
    stage_duration_seconds: HistogramVec,
    stage_errors_total: IntCounterVec,
    stage_last_success_timestamp: GaugeVec,
    records_emitted_total: IntCounterVec,
    cycles_total: IntCounter,
}

impl StageMetrics {
    /// Create the metrics and register them with a private registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric cannot be created or registered.
    pub fn new() -> Result<Self> {
        let stage_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "query_insights_stage_duration_seconds",
                "Time spent in each pipeline stage in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["stage"],
        )?;

        let stage_errors_total = IntCounterVec::new(
            Opts::new(
                "query_insights_stage_errors_total",
                "Total number of failed runs per pipeline stage",
            ),
            &["stage"],
        )?;

        let stage_last_success_timestamp = GaugeVec::new(
            Opts::new(
                "query_insights_stage_last_success_timestamp_seconds",
                "Unix timestamp of the last successful run per pipeline stage",
            ),
            &["stage"],
        )?;

        let records_emitted_total = IntCounterVec::new(
            Opts::new(
                "query_insights_records_emitted_total",
                "Total number of records handed to the emitter per event type",
            ),
            &["event_type"],
        )?;

        let cycles_total = IntCounter::with_opts(Opts::new(
            "query_insights_cycles_total",
            "Total number of collection cycles started",
        ))?;

        let registry = Registry::new();
        registry.register(Box::new(stage_duration_seconds.clone()))?;
        registry.register(Box::new(stage_errors_total.clone()))?;
        registry.register(Box::new(stage_last_success_timestamp.clone()))?;
        registry.register(Box::new(records_emitted_total.clone()))?;
        registry.register(Box::new(cycles_total.clone()))?;

        Ok(Self {
            registry,
            stage_duration_seconds,
            stage_errors_total,
            stage_last_success_timestamp,
            records_emitted_total,
            cycles_total,
        })
    }

    #[must_use]
    pub fn start_stage(&self, stage: &str) -> StageTimer {
        StageTimer {
            stage: stage.to_string(),
            start: Instant::now(),
            metrics: self.clone(),
            finished: false,
        }
    }

    pub fn increment_cycles(&self) {
        self.cycles_total.inc();
    }

    pub fn record_emitted(&self, event_type: &str, count: usize) {
        self.records_emitted_total
            .with_label_values(&[event_type])
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    fn record_success(&self, stage: &str, duration: f64) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        self.stage_duration_seconds
            .with_label_values(&[stage])
            .observe(duration);
        self.stage_last_success_timestamp
            .with_label_values(&[stage])
            .set(timestamp);
    }

    fn record_error(&self, stage: &str, duration: f64) {
        self.stage_duration_seconds
            .with_label_values(&[stage])
            .observe(duration);
        self.stage_errors_total.with_label_values(&[stage]).inc();
    }

    /// Render every metric in the prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).context("metrics are not valid UTF-8")
    }

    /// Write the rendered metrics next to `path` and rename into place, so readers never see a
    /// partial file.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering, writing, or renaming fails.
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let body = self.render()?;
        let tmp = path.with_extension("prom.tmp");

        std::fs::write(&tmp, body)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move metrics into {}", path.display()))?;
        Ok(())
    }
}

/// Measures one stage run. Dropping an unfinished timer counts as success.
pub struct StageTimer {
    stage: String,
    start: Instant,
    metrics: StageMetrics,
    finished: bool,
}

impl StageTimer {
    pub fn success(mut self) {
        self.finished = true;
        self.metrics
            .record_success(&self.stage, self.start.elapsed().as_secs_f64());
    }

    pub fn error(mut self) {
        self.finished = true;
        self.metrics
            .record_error(&self.stage, self.start.elapsed().as_secs_f64());
    }
}

impl Drop for StageTimer {
    fn drop(&mut self) {
        if !self.finished {
            self.metrics
                .record_success(&self.stage, self.start.elapsed().as_secs_f64());
        }
    }
}
