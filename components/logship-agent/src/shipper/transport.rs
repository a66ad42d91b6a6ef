// Local crates
use crate::models::envelope::Envelope;
use crate::shipper::errors::TransportError;

// External crates
use futures::SinkExt;
use reqwest::Url;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, instrument};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the log stream. An upgrade answered with 401/403 comes back as the
/// matching [`TransportError`] variant.
#[instrument(
    name = "shipper::transport::connect",
    target = "shipper::transport",
    skip_all,
    level = "debug"
)]
pub async fn connect(url: &Url, timeout: Duration) -> Result<WsStream, TransportError> {
    match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
        Ok(Ok((stream, response))) => {
            debug!(status = %response.status(), "Log server connection upgraded");
            Ok(stream)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(TransportError::Other(format!(
            "connection attempt timed out after {timeout:?}"
        ))),
    }
}

/// Serialize and write one envelope.
pub async fn send(stream: &mut WsStream, envelope: &Envelope) -> Result<(), TransportError> {
    let payload = envelope
        .to_wire()
        .map_err(|e| TransportError::Other(format!("failed to encode envelope: {e}")))?;
    stream.send(Message::Text(payload.into())).await?;
    Ok(())
}
