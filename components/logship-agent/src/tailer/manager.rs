// Local crates
use crate::metrics::metrics::TAILED_FILES;
use crate::models::envelope::Envelope;
use crate::tailer::{
    models::{TailError, TailEvent},
    tailer::Tailer,
};

// External crates
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Owns every running tailer task. Each discovered file gets exactly one task
/// that turns its line events into envelopes and hands them to the connection
/// manager's outbound channel; tailers never touch the connection.
#[derive(Debug)]
pub struct TailerManager {
    output: mpsc::Sender<Envelope>,
    poll_interval: Duration,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl TailerManager {
    pub fn new(
        output: mpsc::Sender<Envelope>,
        poll_interval: Duration,
        parent_cancel: &CancellationToken,
    ) -> Self {
        Self {
            output,
            poll_interval,
            cancel: parent_cancel.child_token(),
            tasks: JoinSet::new(),
        }
    }

    /// Open a tailer for every path and spawn its forwarding task. Files that
    /// cannot be opened are logged and skipped. Returns the number started.
    #[instrument(name = "pipeline::tailer_manager::start", skip_all, level = "debug")]
    pub async fn start(&mut self, paths: Vec<PathBuf>) -> usize {
        let mut started = 0;

        for path in paths {
            let tailer = match Tailer::open(path.clone(), self.poll_interval).await {
                Ok(tailer) => tailer,
                Err(e) => {
                    warn!(error = %e, file = %path.display(), "Failed to start tailing file");
                    continue;
                }
            };

            self.tasks.spawn(forward_lines(
                tailer,
                self.output.clone(),
                self.cancel.clone(),
            ));
            started += 1;
        }

        TAILED_FILES.add(started as i64);
        info!(files = started, "Tailers started");
        started
    }

    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Stop all tailers and wait for their tasks to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Tailer task failed");
            }
        }
    }
}

async fn forward_lines(tailer: Tailer, output: mpsc::Sender<Envelope>, cancel: CancellationToken) {
    let file = tailer.path().to_string_lossy().into_owned();
    let stream = tailer.into_stream();
    tokio::pin!(stream);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.next() => event,
        };

        match event {
            Some(TailEvent::Line(line)) => {
                if output.send(Envelope::line(line, file.as_str())).await.is_err() {
                    debug!(file = %file, "Outbound channel closed, stopping tailer");
                    break;
                }
            }
            Some(TailEvent::Error(e)) => report(&file, &e),
            None => {
                warn!(file = %file, "File is no longer readable, tailer stopped");
                break;
            }
        }
    }

    TAILED_FILES.dec();
}

fn report(file: &str, e: &TailError) {
    if e.is_fatal() {
        error!(error = %e, file = %file, "Tail error");
    } else {
        warn!(error = %e, file = %file, "Tail error");
    }
}
