pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod telemetry;

use crate::cli::{actions::Action, telemetry::Telemetry};
use anyhow::Result;

/// Parse the command line, install telemetry, and resolve the action to run.
///
/// # Errors
///
/// Returns an error if telemetry cannot be initialized or the arguments are invalid.
pub fn start() -> Result<(Action, Telemetry)> {
    let matches = commands::new().get_matches();

    let telemetry = telemetry::init(matches.get_count("verbose"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git = crate::built_info::GIT_COMMIT_HASH_SHORT.unwrap_or("unknown"),
        "starting {}",
        env!("CARGO_PKG_NAME")
    );

    let action = dispatch::handler(&matches)?;
    Ok((action, telemetry))
}
