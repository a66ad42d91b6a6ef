//! Self-update and restart actions requested by the log server.

// Local crates
use crate::helpers::load_config::ProcessControlConfig;

// External crates
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info, instrument, warn};

/// Actions are fire-and-forget: the caller never waits for them to finish.
pub trait ProcessControl: Send + Sync + std::fmt::Debug {
    fn update(&self);
    fn restart(&self);
}

/// Runs the configured commands through a shell.
#[derive(Debug, Clone)]
pub struct ShellProcessControl {
    config: ProcessControlConfig,
}

impl ShellProcessControl {
    pub fn new(config: ProcessControlConfig) -> Self {
        Self { config }
    }

    #[instrument(name = "helpers::process_control::spawn", skip(self, command), level = "debug")]
    fn spawn(&self, action: &'static str, command: &str) {
        let child = Command::new(&self.config.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, action, shell = %self.config.shell, "Failed to spawn process control command");
                return;
            }
        };

        info!(action, pid = ?child.id(), "Process control command started");
        // reap the child
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => info!(action, "Process control command finished"),
                Ok(status) => warn!(action, %status, "Process control command exited unsuccessfully"),
                Err(e) => warn!(action, error = %e, "Failed to wait on process control command"),
            }
        });
    }
}

impl ProcessControl for ShellProcessControl {
    fn update(&self) {
        self.spawn("update", &self.config.update_command);
    }

    fn restart(&self) {
        self.spawn("restart", &self.config.restart_command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_the_configured_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("restarted");
        let control = ShellProcessControl::new(ProcessControlConfig {
            shell: "/bin/sh".to_string(),
            update_command: "true".to_string(),
            restart_command: format!("touch {}", marker.display()),
        });

        control.restart();

        for _ in 0..100 {
            if marker.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("restart command never ran");
    }

    #[tokio::test]
    async fn missing_shell_is_logged_not_fatal() {
        let control = ShellProcessControl::new(ProcessControlConfig {
            shell: "/nonexistent/shell".to_string(),
            update_command: "true".to_string(),
            restart_command: "true".to_string(),
        });

        control.update();
    }
}
