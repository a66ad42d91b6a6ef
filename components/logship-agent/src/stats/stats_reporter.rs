//! Stats Reporter - periodic heartbeat with the agent's own memory footprint.
//!
//! The loop never stops once started: every tick is rescheduled whether or not
//! a connection is available, and a tick that finds no connection sends nothing.

// Local crates
use crate::metrics::metrics::MEMORY_BYTES;
use crate::models::envelope::{Envelope, ProcessMemory};
use crate::shipper::connection_manager::ConnectionState;

// External crates
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

/// Reads the memory usage of one process.
#[derive(Debug)]
pub struct MemoryProbe {
    system: System,
    pid: Option<Pid>,
}

impl MemoryProbe {
    pub fn current_process() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    pub fn snapshot(&mut self) -> Option<ProcessMemory> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        self.system.process(pid).map(|process| ProcessMemory {
            rss: process.memory(),
            virtual_memory: process.virtual_memory(),
        })
    }
}

#[derive(Debug)]
pub struct StatsReporter {
    output: mpsc::Sender<Envelope>,
    connection: watch::Receiver<ConnectionState>,
    interval: Duration,
    probe: MemoryProbe,
}

impl StatsReporter {
    pub fn new(
        output: mpsc::Sender<Envelope>,
        connection: watch::Receiver<ConnectionState>,
        interval: Duration,
    ) -> Self {
        Self {
            output,
            connection,
            interval,
            probe: MemoryProbe::current_process(),
        }
    }

    /// First heartbeat goes out one interval after start.
    #[instrument(
        name = "stats::stats_reporter::run",
        target = "stats::stats_reporter",
        skip_all,
        level = "debug"
    )]
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!(interval = ?self.interval, "Stats reporter started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }

            if !self.connection.borrow().is_connected() {
                trace!("Not connected, skipping stats heartbeat");
                continue;
            }

            let Some(memory) = self.probe.snapshot() else {
                debug!("Process memory unavailable, skipping stats heartbeat");
                continue;
            };
            MEMORY_BYTES.set(memory.rss as f64);

            let sent = tokio::select! {
                _ = cancel.cancelled() => break,
                sent = self.output.send(Envelope::stats(memory)) => sent,
            };
            if sent.is_err() {
                debug!("Outbound channel closed, stats reporter stopping");
                break;
            }
        }
    }
}
