//! Failure taxonomy for the connection state machine. Each variant maps to
//! exactly one retry policy; nothing here is fatal to the process.

// Local crates
use crate::helpers::load_config::TimingsConfig;

// External crates
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Authentication endpoint failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No HTTP response was obtained (DNS, refused, reset, timeout).
    #[error("authentication request failed: {0}")]
    Network(#[source] reqwest::Error),
    /// The API answered with a non-success status.
    #[error("authentication rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    /// A success status whose body is not a valid token grant.
    #[error("authentication response could not be decoded: {0}")]
    Malformed(#[source] reqwest::Error),
}

impl AuthError {
    /// Delay before the next authentication attempt.
    pub fn retry_delay(&self, timings: &TimingsConfig) -> Duration {
        match self {
            Self::Network(_) | Self::Malformed(_) => timings.auth_error_delay(),
            Self::Rejected { .. } => timings.auth_fail_delay(),
        }
    }

    pub fn outcome_label(&self) -> &'static str {
        match self {
            Self::Network(_) => "network_error",
            Self::Rejected { .. } => "rejected",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// Log server connection failures, classified from the typed HTTP status of
/// the upgrade response.
#[derive(Debug, Error)]
pub enum TransportError {
    /// 401: the token is stale, authenticate again.
    #[error("log server rejected the auth token (401)")]
    Unauthorized,
    /// 403: deliberate deny, back off for the long cooldown.
    #[error("log server denied the connection (403)")]
    Forbidden,
    /// Anything else: refused, reset, timeout, close frame, other status.
    #[error("log server connection failed: {0}")]
    Other(String),
}

/// What the state machine does after a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Reauthenticate,
    Cooldown,
    Reconnect,
}

impl TransportError {
    pub fn from_status(status: u16, reason: impl Into<String>) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            other => Self::Other(format!("unexpected status {other}: {}", reason.into())),
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Unauthorized => Disposition::Reauthenticate,
            Self::Forbidden => Disposition::Cooldown,
            Self::Other(_) => Disposition::Reconnect,
        }
    }

    pub fn class_label(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Other(_) => "other",
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match err {
            WsError::Http(response) => {
                let status = response.status();
                Self::from_status(
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("unknown"),
                )
            }
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_dispositions() {
        assert_eq!(
            TransportError::from_status(401, "Unauthorized").disposition(),
            Disposition::Reauthenticate
        );
        assert_eq!(
            TransportError::from_status(403, "Forbidden").disposition(),
            Disposition::Cooldown
        );
        assert_eq!(
            TransportError::from_status(502, "Bad Gateway").disposition(),
            Disposition::Reconnect
        );
    }

    #[test]
    fn socket_level_failures_reconnect() {
        use tokio_tungstenite::tungstenite::Error as WsError;

        let err: TransportError = WsError::ConnectionClosed.into();
        assert_eq!(err.disposition(), Disposition::Reconnect);
        assert_eq!(err.class_label(), "other");
    }
}
