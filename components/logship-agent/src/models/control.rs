// External crates
use serde::Deserialize;
use thiserror::Error;

/// Control messages pushed by the log server over the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "e")]
pub enum ControlMessage {
    /// `{"e":"u"}`: install the latest agent package.
    #[serde(rename = "u")]
    Update,
    /// `{"e":"r"}`: restart the agent service.
    #[serde(rename = "r")]
    Restart,
}

/// Inbound frame that could not be understood. Always logged, never fatal.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("inbound frame is not a JSON object: {0}")]
    NotAnObject(String),
    #[error("unrecognized control message {raw}: {source}")]
    Unrecognized {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ControlMessage {
    /// Decode a text frame received from the log server.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        if !raw.trim_start().starts_with('{') {
            return Err(ProtocolError::NotAnObject(raw.to_string()));
        }

        serde_json::from_str(raw).map_err(|source| ProtocolError::Unrecognized {
            raw: raw.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_update_and_restart() {
        assert_eq!(ControlMessage::parse(r#"{"e":"u"}"#).unwrap(), ControlMessage::Update);
        assert_eq!(ControlMessage::parse(r#"{"e":"r"}"#).unwrap(), ControlMessage::Restart);
    }

    #[test]
    fn extra_fields_are_tolerated() {
        let msg = ControlMessage::parse(r#"{"e":"r","reason":"config change"}"#).unwrap();
        assert_eq!(msg, ControlMessage::Restart);
    }

    #[test]
    fn unknown_shapes_are_protocol_errors() {
        assert!(matches!(
            ControlMessage::parse("ping"),
            Err(ProtocolError::NotAnObject(_))
        ));
        assert!(matches!(
            ControlMessage::parse(r#"{"e":"x"}"#),
            Err(ProtocolError::Unrecognized { .. })
        ));
        assert!(matches!(
            ControlMessage::parse(r#"{"event":"u"}"#),
            Err(ProtocolError::Unrecognized { .. })
        ));
    }
}
