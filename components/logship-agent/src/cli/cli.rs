use crate::discovery::discovery::scan_all;
use crate::helpers::load_config::Config;
use crate::runtime;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/logship/agent.toml";

#[derive(Parser)]
#[command(
    name = "logship-agent",
    long_about = "logship-agent discovers local log files, tails them and streams new lines to a remote ingestion endpoint over a persistent connection.",
    about = "Host-resident log shipping agent",
    version,
    term_width = 100,
    after_help = "\
    EXAMPLES:
        logship-agent run --config /etc/logship/agent.toml
        logship-agent validate --config ./agent.toml
        logship-agent scan --config ./agent.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until SIGINT or SIGTERM
    Run {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Validate the configuration file and print the resolved settings
    Validate {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// List the files the configured log directories would tail
    Scan {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Display version information
    Version,
}

/// Entry function for CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => runtime::runtime::run_agent(config).await?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Scan { config } => scan_sources(config).await?,
        Commands::Version => show_version(),
    }

    Ok(())
}

//
// ------------------------ Command Implementations ------------------------------
//

fn validate_config(config: PathBuf) -> Result<()> {
    println!("Validating configuration file: {}", config.display());
    let cfg = Config::load(&config)?;
    println!("Configuration valid:\n{:#?}", redacted(cfg));
    Ok(())
}

async fn scan_sources(config: PathBuf) -> Result<()> {
    let cfg = Config::load(&config)?;
    let roots = cfg.agent.logdir;
    let files = tokio::task::spawn_blocking(move || scan_all(&roots)).await?;

    for file in &files {
        println!("{}", file.display());
    }
    println!("{} file(s) would be tailed", files.len());
    Ok(())
}

fn show_version() {
    println!("logship-agent {}", env!("CARGO_PKG_VERSION"));
}

/// Keep the agent key out of terminal output.
fn redacted(mut cfg: Config) -> Config {
    let visible: String = cfg.agent.key.chars().take(4).collect();
    cfg.agent.key = format!("{visible}****");
    cfg
}
