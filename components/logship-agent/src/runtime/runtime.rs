// Local crates
use crate::{
    buffer::outbound_buffer::OutboundBuffer,
    discovery::discovery::scan_all,
    helpers::{
        host_metadata::HostMetadata,
        load_config::{Config, TimingsConfig},
        process_control::ShellProcessControl,
        shutdown::Shutdown,
    },
    instrumentation,
    metrics::http::start_metrics_server,
    models::envelope::Envelope,
    shipper::{
        auth_client::AuthClient,
        connection_manager::{ConnectionManager, ConnectionState},
    },
    stats::stats_reporter::StatsReporter,
    tailer::manager::TailerManager,
};

// External crates
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Envelopes in flight between producers and the connection manager. Producers
/// wait when it is full.
const OUTBOUND_CHANNEL_CAPACITY: usize = 1024;
const SOURCES_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Agent runtime: load configuration, wire the pipeline and run until SIGINT
/// or SIGTERM.
pub async fn run_agent(config_path: PathBuf) -> Result<()> {
    let cfg = Config::load(&config_path)?;

    let _log_guard = instrumentation::tracing::init_tracing(&cfg.logging)?;
    instrumentation::tracing::init_panic_handler();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting logship agent"
    );

    run_pipeline(cfg).await
}

/// Run the pipeline with an already loaded configuration.
#[instrument(name = "runtime::run_pipeline", target = "runtime", skip_all, level = "debug")]
pub async fn run_pipeline(cfg: Config) -> Result<()> {
    let shutdown = Shutdown::new();
    let global_cancel_token = CancellationToken::new();

    tokio::spawn(shutdown.clone().listen_for_signals());

    if let Some(addr) = cfg.metrics.listen_addr.clone() {
        let cancel = global_cancel_token.child_token();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(&addr, cancel).await {
                error!(error = %e, "Metrics server stopped");
            }
        });
    }

    let cloud = cfg.agent.cloud.clone();
    let metadata = tokio::task::spawn_blocking(move || HostMetadata::collect(&cloud))
        .await
        .context("Host metadata collection failed")?;
    let auth = AuthClient::new(&cfg, &metadata).context("Failed to build the API client")?;

    let (tx, rx) = mpsc::channel::<Envelope>(OUTBOUND_CHANNEL_CAPACITY);
    let buffer = OutboundBuffer::new(cfg.timings.grace_period());
    let control = Arc::new(ShellProcessControl::new(cfg.process_control.clone()));

    let manager = ConnectionManager::new(
        &cfg,
        auth,
        control,
        buffer,
        rx,
        global_cancel_token.child_token(),
    );
    let connection = manager.subscribe();

    let (sources_tx, sources_rx) = oneshot::channel::<JoinHandle<()>>();
    let roots = cfg.agent.logdir.clone();
    let timings = cfg.timings.clone();
    let sources_cancel = global_cancel_token.child_token();
    let manager = manager.on_first_connect(Box::new(move || {
        let handle = tokio::spawn(start_sources(
            roots,
            tx,
            connection,
            timings,
            sources_cancel,
        ));
        let _ = sources_tx.send(handle);
    }));

    let manager_handle = tokio::spawn(manager.run());

    shutdown.wait_for_shutdown().await;
    info!("Shutting down logship agent");
    global_cancel_token.cancel();

    if let Err(e) = manager_handle.await {
        error!(error = %e, "Connection manager task failed");
    }

    if let Ok(sources) = sources_rx.await {
        match tokio::time::timeout(SOURCES_SHUTDOWN_TIMEOUT, sources).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Log sources task failed"),
            Err(_) => warn!("Log sources did not stop in time"),
        }
    }

    info!("Logship agent stopped");
    Ok(())
}

/// Scan the configured roots once, then tail every file found and start the
/// stats heartbeat. Runs until cancelled.
async fn start_sources(
    roots: Vec<PathBuf>,
    output: mpsc::Sender<Envelope>,
    connection: watch::Receiver<ConnectionState>,
    timings: TimingsConfig,
    cancel: CancellationToken,
) {
    let files = match tokio::task::spawn_blocking(move || scan_all(&roots)).await {
        Ok(files) => files,
        Err(e) => {
            error!(error = %e, "Log directory scan failed");
            Vec::new()
        }
    };
    info!(files = files.len(), "Log directory scan complete");

    let mut tailers = TailerManager::new(output.clone(), timings.poll_interval(), &cancel);
    tailers.start(files).await;

    let stats = StatsReporter::new(output, connection, timings.stats_interval());
    let stats_task = tokio::spawn(stats.run(cancel.child_token()));

    cancel.cancelled().await;
    tailers.shutdown().await;
    if let Err(e) = stats_task.await {
        error!(error = %e, "Stats reporter task failed");
    }
}
