use anyhow::Result;
use logship_agent::cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing is installed by the `run` command once the configuration that
    // describes it has been loaded.
    cli::cli::run().await
}
