//! Client for the authentication endpoint that exchanges the agent key and
//! host identity for a log server token.

// Local crates
use crate::helpers::host_metadata::HostMetadata;
use crate::helpers::load_config::Config;
use crate::metrics::metrics::AUTH_ATTEMPTS_TOTAL;
use crate::shipper::errors::AuthError;
use crate::shipper::session::AuthGrant;

// External crates
use anyhow::Context;
use serde::Serialize;
use tracing::{debug, instrument, warn};

pub const AGENT_NAME: &str = "logship-agent";
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Body of `POST /authenticate/{key}`. Absent fields are omitted.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    pub agentname: String,
    pub agentversion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub osdist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awsid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awsregion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awsaz: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awsami: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub awstype: Option<String>,
}

impl AuthRequest {
    pub fn new(metadata: &HostMetadata, tags: Option<String>) -> Self {
        Self {
            hostname: metadata.hostname.clone(),
            mac: metadata.mac.clone(),
            ip: metadata.ip.clone(),
            tags,
            agentname: format!("{AGENT_NAME}-{}", std::env::consts::OS),
            agentversion: AGENT_VERSION.to_string(),
            osdist: metadata.os_distribution.clone(),
            awsid: metadata.cloud.instance_id.clone(),
            awsregion: metadata.cloud.region.clone(),
            awsaz: metadata.cloud.availability_zone.clone(),
            awsami: metadata.cloud.image_id.clone(),
            awstype: metadata.cloud.instance_type.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthClient {
    http: reqwest::Client,
    endpoint: String,
    request: AuthRequest,
}

impl AuthClient {
    pub fn new(config: &Config, metadata: &HostMetadata) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timings.request_timeout())
            .connect_timeout(config.timings.connect_timeout())
            .build()
            .context("Failed to build the authentication HTTP client")?;

        let scheme = if config.api.ssl { "https" } else { "http" };
        let endpoint = format!(
            "{scheme}://{}/authenticate/{}",
            config.api.host, config.agent.key
        );

        Ok(Self {
            http,
            endpoint,
            request: AuthRequest::new(metadata, config.agent.tags.clone()),
        })
    }

    /// One authentication attempt. Retry scheduling is left to the caller,
    /// which derives the delay from the returned error.
    #[instrument(
        name = "shipper::auth_client::authenticate",
        target = "shipper::auth_client",
        skip_all,
        level = "debug"
    )]
    pub async fn authenticate(&self) -> Result<AuthGrant, AuthError> {
        let result = self.try_authenticate().await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome_label(),
        };
        AUTH_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
        result
    }

    async fn try_authenticate(&self) -> Result<AuthGrant, AuthError> {
        debug!(api_host = %self.host_for_logs(), "Authenticating agent key");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&self.request)
            .send()
            .await
            .map_err(AuthError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Authentication rejected");
            return Err(AuthError::Rejected { status, body });
        }

        let grant: AuthGrant = response.json().await.map_err(AuthError::Malformed)?;
        debug!(server = %grant.server, port = grant.port, ssl = grant.ssl, "Authentication succeeded");
        Ok(grant)
    }

    /// Endpoint without the agent key path segment.
    fn host_for_logs(&self) -> &str {
        self.endpoint
            .split("/authenticate/")
            .next()
            .unwrap_or(self.endpoint.as_str())
    }
}
