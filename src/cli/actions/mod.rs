pub mod run;

use crate::collectors::config::PipelineConfig;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug)]
pub enum Action {
    Run {
        dsn: SecretString,
        config: PipelineConfig,
        remote_monitoring: bool,
        /// `None` runs a single cycle.
        interval: Option<Duration>,
        metrics_textfile: Option<PathBuf>,
    },
}
