// External crates
use anyhow::{Context, Result, bail};
use config::{Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::instrument;

pub const DEFAULT_API_HOST: &str = "api.logship.dev";
pub const DEFAULT_LOG_HOST: &str = "logs.logship.dev";
pub const DEFAULT_LOG_PORT: u16 = 80;
pub const DEFAULT_LOG_DIR: &str = "/var/log";
pub const ENV_PREFIX: &str = "LOGSHIP";

/// Agent configuration as supplied to the pipeline. Loaded from a TOML file and
/// overlaid with `LOGSHIP__<SECTION>__<KEY>` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub agent: AgentConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub log_server: LogServerConfig,
    #[serde(default)]
    pub timings: TimingsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub process_control: ProcessControlConfig,
}

impl Config {
    /// Load, overlay environment overrides, and validate the configuration file
    #[instrument(
        name = "config_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        tracing::trace!(
            configuration_file_path = %path_ref.display(),
            "Loading agent configuration file"
        );

        let settings = match config::Config::builder()
            .add_source(File::from(path_ref).format(FileFormat::Toml).required(true))
            .add_source(environment_overrides())
            .build()
        {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read configuration sources");
                return Err(e)
                    .with_context(|| format!("Failed to read config file at {:?}", path_ref));
            }
        };

        let config: Config = match settings.try_deserialize() {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to deserialize configuration");
                return Err(e)
                    .with_context(|| format!("Failed to parse configuration from {:?}", path_ref));
            }
        };

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {:?}", path_ref))?;

        tracing::trace!(configuration_file_path = %path_ref.display(), "Agent configuration file loaded successfully");
        Ok(config)
    }

    /// Parse configuration from an in-memory TOML document. No environment overlay.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .context("Failed to read TOML configuration")?
            .try_deserialize()
            .context("Failed to parse TOML configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.key.trim().is_empty() {
            bail!("agent.key must be set");
        }
        if self.agent.logdir.is_empty() {
            bail!("agent.logdir must list at least one path");
        }
        if self.timings.poll_interval_ms == 0 {
            bail!("timings.poll_interval_ms must be greater than zero");
        }
        if self.timings.stats_interval_ms == 0 {
            bail!("timings.stats_interval_ms must be greater than zero");
        }
        if self.timings.reconnect_min_ms > self.timings.reconnect_max_ms {
            bail!(
                "timings.reconnect_min_ms ({}) exceeds timings.reconnect_max_ms ({})",
                self.timings.reconnect_min_ms,
                self.timings.reconnect_max_ms
            );
        }
        Ok(())
    }
}

fn environment_overrides() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("agent.logdir")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub key: String,
    #[serde(default = "default_logdir")]
    pub logdir: Vec<PathBuf>,
    pub tags: Option<String>,
    #[serde(default = "default_true")]
    pub autoupdate: bool,
    #[serde(default)]
    pub cloud: CloudConfig,
}

/// Cloud instance identity. Every field is optional and omitted from the
/// authentication request when absent.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CloudConfig {
    pub instance_id: Option<String>,
    pub region: Option<String>,
    pub availability_zone: Option<String>,
    pub image_id: Option<String>,
    pub instance_type: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_true")]
    pub ssl: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            ssl: true,
        }
    }
}

/// Explicit log server target. When any of `host`/`port` is set the server
/// assigned target returned by authentication is ignored.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ssl: Option<bool>,
}

impl LogServerConfig {
    pub fn has_overrides(&self) -> bool {
        self.host.is_some() || self.port.is_some()
    }
}

/// Every delay used by the pipeline, in milliseconds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimingsConfig {
    pub poll_interval_ms: u64,
    pub stats_interval_ms: u64,
    pub auth_error_delay_ms: u64,
    pub auth_fail_delay_ms: u64,
    pub reauth_delay_ms: u64,
    pub grace_period_ms: u64,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            stats_interval_ms: 300_000,
            auth_error_delay_ms: 60_000,
            auth_fail_delay_ms: 3_600_000,
            reauth_delay_ms: 250,
            grace_period_ms: 120_000,
            reconnect_min_ms: 1_000,
            reconnect_max_ms: 5_000,
            connect_timeout_ms: 30_000,
            request_timeout_ms: 30_000,
        }
    }
}

impl TimingsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
    pub fn auth_error_delay(&self) -> Duration {
        Duration::from_millis(self.auth_error_delay_ms)
    }
    pub fn auth_fail_delay(&self) -> Duration {
        Duration::from_millis(self.auth_fail_delay_ms)
    }
    pub fn reauth_delay(&self) -> Duration {
        Duration::from_millis(self.reauth_delay_ms)
    }
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms)
    }
    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
    pub file_prefix: String,
    pub filter: String,
    pub json: bool,
    pub stderr: bool,
    pub tokio_console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("/var/lib/logship-agent"),
            file_prefix: "agent_runtime".to_string(),
            filter: "info".to_string(),
            json: false,
            stderr: true,
            tokio_console: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetricsConfig {
    pub listen_addr: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProcessControlConfig {
    pub shell: String,
    pub update_command: String,
    pub restart_command: String,
}

impl Default for ProcessControlConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
            update_command: concat!(
                "if [[ ! -z $(which apt-get) ]]; then apt-get update; apt-get install -y logship-agent; ",
                "elif [[ ! -z $(which yum) ]]; then yum clean expire-cache; yum -y install logship-agent; ",
                "elif [[ ! -z $(which zypper) ]]; then zypper refresh; zypper install -y logship-agent; fi; ",
                "sleep 1; systemctl restart logship-agent"
            )
            .to_string(),
            restart_command: "systemctl restart logship-agent".to_string(),
        }
    }
}

fn default_logdir() -> Vec<PathBuf> {
    vec![PathBuf::from(DEFAULT_LOG_DIR)]
}

fn default_api_host() -> String {
    DEFAULT_API_HOST.to_string()
}

fn default_true() -> bool {
    true
}
