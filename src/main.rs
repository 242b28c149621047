use anyhow::Result;
use mysql_query_insights::cli::{actions::run, start};

#[tokio::main]
async fn main() -> Result<()> {
    let (action, telemetry) = start()?;

    let result = run::handle(action).await;
    if let Err(e) = &result {
        tracing::error!("{e:#}");
    }

    telemetry.shutdown();
    result
}
