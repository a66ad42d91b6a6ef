// Local crates
use crate::helpers::load_config::{
    Config, DEFAULT_LOG_HOST, DEFAULT_LOG_PORT, LogServerConfig, TimingsConfig,
};
use crate::shipper::backoff::{Backoff, BackoffBounds};

// External crates
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

/// Token grant returned by the authentication endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthGrant {
    pub token: String,
    pub server: String,
    pub port: u16,
    #[serde(default)]
    pub ssl: bool,
}

/// Where the log stream goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
}

impl LogTarget {
    /// Configured overrides win over the server's assignment as a whole, so a
    /// partial override falls back to the documented defaults.
    fn resolve(grant: &AuthGrant, overrides: &LogServerConfig) -> Self {
        if overrides.has_overrides() {
            return Self {
                host: overrides
                    .host
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LOG_HOST.to_string()),
                port: overrides.port.unwrap_or(DEFAULT_LOG_PORT),
                ssl: overrides.ssl.unwrap_or(false),
            };
        }

        Self {
            host: grant.server.clone(),
            port: grant.port,
            ssl: grant.ssl,
        }
    }
}

/// Mutable connection state owned by the connection manager: the single
/// authoritative token, its target, and the reconnection policy.
#[derive(Debug)]
pub struct Session {
    auth_token: Option<String>,
    target: Option<LogTarget>,
    overrides: LogServerConfig,
    default_bounds: BackoffBounds,
    cooldown: Duration,
    backoff: Backoff,
    connected_once: bool,
}

impl Session {
    pub fn new(config: &Config) -> Self {
        let default_bounds = default_bounds(&config.timings);
        Self {
            auth_token: None,
            target: None,
            overrides: config.log_server.clone(),
            default_bounds,
            cooldown: config.timings.auth_fail_delay(),
            backoff: Backoff::new(default_bounds),
            connected_once: false,
        }
    }

    /// Replace the token and target. Every later connection attempt uses it.
    pub fn apply_grant(&mut self, grant: &AuthGrant) {
        self.target = Some(LogTarget::resolve(grant, &self.overrides));
        self.auth_token = Some(grant.token.clone());
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn target(&self) -> Option<&LogTarget> {
        self.target.as_ref()
    }

    pub fn bounds(&self) -> BackoffBounds {
        self.backoff.bounds()
    }

    pub fn attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// Deliberate deny: hold off for the long cooldown until a connection succeeds.
    pub fn on_forbidden(&mut self) {
        self.backoff.set_bounds(BackoffBounds::fixed(self.cooldown));
    }

    /// Returns `true` for the first successful connection of the process.
    pub fn on_connected(&mut self) -> bool {
        self.backoff.reset(self.default_bounds);
        !std::mem::replace(&mut self.connected_once, true)
    }

    pub fn next_reconnect_delay(&mut self) -> Duration {
        self.backoff.next_delay()
    }

    /// Connection URL for the next attempt, with a fresh timestamp each call.
    pub fn connection_url(&self, timestamp_ms: i64) -> Option<Url> {
        let target = self.target.as_ref()?;
        let token = self.auth_token.as_deref()?;
        let scheme = if target.ssl { "wss" } else { "ws" };
        let base = format!("{scheme}://{}:{}/", target.host, target.port);

        Url::parse_with_params(
            &base,
            &[
                ("auth_token", token.to_string()),
                ("timestamp", timestamp_ms.to_string()),
            ],
        )
        .ok()
    }
}

fn default_bounds(timings: &TimingsConfig) -> BackoffBounds {
    BackoffBounds::new(timings.reconnect_min(), timings.reconnect_max())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(extra: &str) -> Config {
        Config::from_toml_str(&format!("[agent]\nkey = \"k-123\"\n{extra}")).unwrap()
    }

    fn grant(token: &str) -> AuthGrant {
        AuthGrant {
            token: token.to_string(),
            server: "ingest-7.example.net".to_string(),
            port: 8443,
            ssl: true,
        }
    }

    #[test]
    fn forbidden_widens_bounds_until_next_success() {
        let mut session = Session::new(&config(""));
        let short = BackoffBounds::new(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(session.bounds(), short);

        session.on_forbidden();
        assert_eq!(session.bounds(), BackoffBounds::fixed(Duration::from_secs(3600)));
        assert_eq!(session.next_reconnect_delay(), Duration::from_secs(3600));

        assert!(session.on_connected());
        assert_eq!(session.bounds(), short);
        assert_eq!(session.attempts(), 0);
        assert!(!session.on_connected());
    }

    #[test]
    fn server_assignment_is_used_without_overrides() {
        let mut session = Session::new(&config(""));
        session.apply_grant(&grant("tok-1"));

        let url = session.connection_url(1_700_000_000_000).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://ingest-7.example.net:8443/?auth_token=tok-1&timestamp=1700000000000"
        );
    }

    #[test]
    fn overrides_replace_the_server_assignment() {
        let mut session = Session::new(&config("[log_server]\nport = 9000\n"));
        session.apply_grant(&grant("tok-1"));

        let target = session.target().unwrap();
        assert_eq!(target.host, DEFAULT_LOG_HOST);
        assert_eq!(target.port, 9000);
        assert!(!target.ssl);
    }

    #[test]
    fn latest_grant_wins() {
        let mut session = Session::new(&config(""));
        session.apply_grant(&grant("tok-1"));
        session.apply_grant(&grant("tok-2"));

        assert_eq!(session.auth_token(), Some("tok-2"));
        let url = session.connection_url(1).unwrap();
        assert!(url.query().unwrap().contains("auth_token=tok-2"));
    }

    #[test]
    fn no_url_before_authentication() {
        assert!(Session::new(&config("")).connection_url(1).is_none());
    }
}
