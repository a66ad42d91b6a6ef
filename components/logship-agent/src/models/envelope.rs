//! Outbound envelopes, the unit of data written to the log server connection.
//!
//! Wire shapes:
//! - line:  `{"e":"l","t":<epoch_ms>,"l":<string>,"f":<filepath>}`
//! - stats: `{"e":"s","m":<process-memory-object>}`

// External crates
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Process memory snapshot carried by a stats heartbeat. Values are bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessMemory {
    pub rss: u64,
    #[serde(rename = "vms")]
    pub virtual_memory: u64,
}

/// One JSON message sent to the log server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "e")]
pub enum Envelope {
    #[serde(rename = "l")]
    Line {
        #[serde(rename = "t")]
        timestamp: i64,
        #[serde(rename = "l")]
        line: String,
        #[serde(rename = "f")]
        file: String,
    },
    #[serde(rename = "s")]
    Stats {
        #[serde(skip)]
        timestamp: i64,
        #[serde(rename = "m")]
        memory: ProcessMemory,
    },
}

impl Envelope {
    /// Build a line envelope stamped with the current wall clock.
    pub fn line(line: String, file: impl Into<String>) -> Self {
        Self::Line {
            timestamp: Utc::now().timestamp_millis(),
            line,
            file: file.into(),
        }
    }

    pub fn stats(memory: ProcessMemory) -> Self {
        Self::Stats {
            timestamp: Utc::now().timestamp_millis(),
            memory,
        }
    }

    /// Short kind label used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Line { .. } => "line",
            Self::Stats { .. } => "stats",
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Line { timestamp, .. } | Self::Stats { timestamp, .. } => *timestamp,
        }
    }

    /// Serialize to the JSON text frame sent over the connection.
    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn line_envelope_uses_short_keys() {
        let envelope = Envelope::Line {
            timestamp: 1_700_000_000_123,
            line: "kernel: eth0 up".to_string(),
            file: "/var/log/kern.log".to_string(),
        };

        let wire: Value = serde_json::from_str(&envelope.to_wire().unwrap()).unwrap();
        assert_eq!(
            wire,
            json!({"e": "l", "t": 1_700_000_000_123_i64, "l": "kernel: eth0 up", "f": "/var/log/kern.log"})
        );
    }

    #[test]
    fn stats_envelope_omits_timestamp() {
        let envelope = Envelope::stats(ProcessMemory {
            rss: 4096,
            virtual_memory: 8192,
        });

        let wire: Value = serde_json::from_str(&envelope.to_wire().unwrap()).unwrap();
        assert_eq!(wire, json!({"e": "s", "m": {"rss": 4096, "vms": 8192}}));
        assert_eq!(envelope.kind(), "stats");
    }
}
