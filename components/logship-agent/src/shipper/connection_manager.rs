//! Connection Manager - sole owner and writer of the log server connection.
//!
//! Responsibilities:
//! - Authenticate the agent key and keep exactly one authoritative token.
//! - Open the WebSocket with the latest token and a fresh timestamp.
//! - Forward envelopes from tailers and the stats reporter, replaying the
//!   outbound buffer ahead of live traffic after a reconnect.
//! - Dispatch inbound control messages to the process control collaborator.
//! - Classify failures and pick the matching retry policy.
//!
//! State flow:
//! `Authenticating -> Connecting -> Connected -> Reconnecting -> Connecting`,
//! with a stale token (401) going back to `Authenticating` and a deliberate
//! deny (403) widening the reconnection backoff until the next success.

// Local crates
use crate::buffer::outbound_buffer::{Enqueued, OutboundBuffer};
use crate::helpers::load_config::{Config, TimingsConfig};
use crate::helpers::process_control::ProcessControl;
use crate::metrics::metrics::{
    CONNECTED, CONNECTIONS_TOTAL, ENVELOPES_DROPPED_TOTAL, ENVELOPES_SENT_TOTAL,
    TRANSPORT_ERRORS_TOTAL,
};
use crate::models::control::ControlMessage;
use crate::models::envelope::Envelope;
use crate::shipper::auth_client::AuthClient;
use crate::shipper::errors::{Disposition, TransportError};
use crate::shipper::session::Session;
use crate::shipper::transport::{self, WsStream};

// External crates
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Published on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Authenticating,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, delay: Duration },
    Stopped,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Runs once, on the first successful connection of the process.
pub type FirstConnectHook = Box<dyn FnOnce() + Send>;

enum Next {
    Authenticate,
    Connect,
    Stop,
}

pub struct ConnectionManager {
    timings: TimingsConfig,
    autoupdate: bool,
    session: Session,
    auth: AuthClient,
    buffer: OutboundBuffer,
    inbound: mpsc::Receiver<Envelope>,
    inbound_open: bool,
    state: watch::Sender<ConnectionState>,
    control: Arc<dyn ProcessControl>,
    on_first_connect: Option<FirstConnectHook>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("session", &self.session)
            .field("state", &*self.state.borrow())
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(
        config: &Config,
        auth: AuthClient,
        control: Arc<dyn ProcessControl>,
        buffer: OutboundBuffer,
        inbound: mpsc::Receiver<Envelope>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Authenticating);
        Self {
            timings: config.timings.clone(),
            autoupdate: config.agent.autoupdate,
            session: Session::new(config),
            auth,
            buffer,
            inbound,
            inbound_open: true,
            state,
            control,
            on_first_connect: None,
            cancel,
        }
    }

    pub fn on_first_connect(mut self, hook: FirstConnectHook) -> Self {
        self.on_first_connect = Some(hook);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Drive the state machine until cancelled. Never gives up on its own.
    #[instrument(
        name = "shipper::connection_manager::run",
        target = "shipper::connection_manager",
        skip_all,
        level = "debug"
    )]
    pub async fn run(mut self) {
        let mut next = Next::Authenticate;
        loop {
            next = match next {
                Next::Authenticate => self.authenticate().await,
                Next::Connect => self.connect().await,
                Next::Stop => break,
            };
        }

        CONNECTED.set(0);
        self.publish(ConnectionState::Stopped);
        info!("Connection manager stopped");
    }

    fn publish(&self, state: ConnectionState) {
        trace!(state = ?state, "Connection state transition");
        self.state.send_replace(state);
    }

    async fn authenticate(&mut self) -> Next {
        loop {
            self.publish(ConnectionState::Authenticating);

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Next::Stop,
                result = self.auth.authenticate() => result,
            };

            match result {
                Ok(grant) => {
                    self.session.apply_grant(&grant);
                    info!(
                        server = ?self.session.target().map(|t| t.host.as_str()),
                        "Agent key authenticated"
                    );
                    return Next::Connect;
                }
                Err(e) => {
                    let delay = e.retry_delay(&self.timings);
                    warn!(error = %e, retry_in = ?delay, "Authentication failed");
                    if !self.idle(delay).await {
                        return Next::Stop;
                    }
                }
            }
        }
    }

    async fn connect(&mut self) -> Next {
        loop {
            self.publish(ConnectionState::Connecting);

            let Some(url) = self.session.connection_url(Utc::now().timestamp_millis()) else {
                warn!("No usable log server target, authenticating again");
                return Next::Authenticate;
            };

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => return Next::Stop,
                opened = transport::connect(&url, self.timings.connect_timeout()) => opened,
            };

            let (err, was_established) = match opened {
                Ok(mut stream) => match self.serve(&mut stream).await {
                    Some(err) => (err, true),
                    None => return Next::Stop,
                },
                Err(err) => (err, false),
            };

            CONNECTED.set(0);
            TRANSPORT_ERRORS_TOTAL
                .with_label_values(&[err.class_label()])
                .inc();
            if was_established {
                warn!(error = %err, "Log server connection lost");
                self.buffer.arm_grace();
            } else {
                warn!(error = %err, "Log server connection attempt failed");
            }

            match err.disposition() {
                Disposition::Reauthenticate => {
                    if !self.idle(self.timings.reauth_delay()).await {
                        return Next::Stop;
                    }
                    return Next::Authenticate;
                }
                Disposition::Cooldown => self.session.on_forbidden(),
                Disposition::Reconnect => {}
            }

            let delay = self.session.next_reconnect_delay();
            self.publish(ConnectionState::Reconnecting {
                attempt: self.session.attempts(),
                delay,
            });
            debug!(retry_in = ?delay, attempt = self.session.attempts(), "Reconnecting to log server");
            if !self.idle(delay).await {
                return Next::Stop;
            }
        }
    }

    /// Handle one open connection until it fails or the manager is
    /// cancelled. Returns the failure, or `None` on cancellation.
    async fn serve(&mut self, stream: &mut WsStream) -> Option<TransportError> {
        let first = self.session.on_connected();
        CONNECTIONS_TOTAL.inc();
        CONNECTED.set(1);
        self.publish(ConnectionState::Connected);
        info!(first, "Connected to log server");

        if first {
            if let Some(hook) = self.on_first_connect.take() {
                hook();
            }
        } else {
            self.buffer.cancel_grace();
            if let Err(e) = self.flush_backlog(stream).await {
                return Some(e);
            }
        }

        self.pump(stream).await
    }

    /// Send everything buffered while disconnected, oldest first. Whatever
    /// could not be sent goes back to the head of the buffer.
    async fn flush_backlog(&mut self, stream: &mut WsStream) -> Result<(), TransportError> {
        let backlog = self.buffer.drain_and_clear();
        if backlog.is_empty() {
            return Ok(());
        }

        let total = backlog.len();
        let mut pending = backlog.into_iter();
        while let Some(envelope) = pending.next() {
            if let Err(e) = transport::send(stream, &envelope).await {
                let mut unsent = vec![envelope];
                unsent.extend(pending);
                self.buffer.arm_grace();
                self.buffer.requeue_front(unsent);
                return Err(e);
            }
            ENVELOPES_SENT_TOTAL
                .with_label_values(&[envelope.kind()])
                .inc();
        }

        info!(envelopes = total, "Outbound buffer replayed");
        Ok(())
    }

    async fn pump(&mut self, stream: &mut WsStream) -> Option<TransportError> {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    if let Err(e) = stream.close(None).await {
                        debug!(error = %e, "Failed to close log server connection cleanly");
                    }
                    return None;
                }

                envelope = self.inbound.recv(), if self.inbound_open => match envelope {
                    Some(envelope) => {
                        if let Err(e) = transport::send(stream, &envelope).await {
                            self.buffer.arm_grace();
                            self.hold(envelope);
                            return Some(e);
                        }
                        ENVELOPES_SENT_TOTAL
                            .with_label_values(&[envelope.kind()])
                            .inc();
                    }
                    None => {
                        debug!("All envelope producers are gone");
                        self.inbound_open = false;
                    }
                },

                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        return Some(TransportError::Other(format!(
                            "server closed the connection: {frame:?}"
                        )));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Some(e.into()),
                    None => {
                        return Some(TransportError::Other(
                            "connection stream ended".to_string(),
                        ));
                    }
                },
            }
        }
    }

    fn dispatch(&self, raw: &str) {
        match ControlMessage::parse(raw) {
            Ok(ControlMessage::Update) if self.autoupdate => {
                info!("Update requested by log server");
                self.control.update();
            }
            Ok(ControlMessage::Update) => {
                info!("Update requested by log server, ignored because autoupdate is disabled");
            }
            Ok(ControlMessage::Restart) => {
                info!("Restart requested by log server");
                self.control.restart();
            }
            Err(e) => warn!(error = %e, "Unrecognized message from log server"),
        }
    }

    /// Wait out `delay` while absorbing produced envelopes into the buffer.
    /// Returns `false` when cancelled.
    async fn idle(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                envelope = self.inbound.recv(), if self.inbound_open => match envelope {
                    Some(envelope) => self.hold(envelope),
                    None => self.inbound_open = false,
                },
            }
        }
    }

    fn hold(&self, envelope: Envelope) {
        if let Enqueued::Declined(envelope) = self.buffer.enqueue(envelope) {
            ENVELOPES_DROPPED_TOTAL.inc();
            trace!(kind = envelope.kind(), "Envelope dropped, no grace window armed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::host_metadata::HostMetadata;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingControl {
        calls: Mutex<Vec<&'static str>>,
    }

    impl ProcessControl for RecordingControl {
        fn update(&self) {
            self.calls.lock().unwrap().push("update");
        }

        fn restart(&self) {
            self.calls.lock().unwrap().push("restart");
        }
    }

    fn manager(autoupdate: bool, control: Arc<RecordingControl>) -> ConnectionManager {
        let config = Config::from_toml_str(&format!(
            "[agent]\nkey = \"k\"\nautoupdate = {autoupdate}\n[api]\nhost = \"127.0.0.1:9\"\nssl = false\n"
        ))
        .unwrap();
        let auth = AuthClient::new(&config, &HostMetadata::default()).unwrap();
        let (_tx, rx) = mpsc::channel(1);
        ConnectionManager::new(
            &config,
            auth,
            control,
            OutboundBuffer::new(config.timings.grace_period()),
            rx,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn control_messages_reach_process_control() {
        let control = Arc::new(RecordingControl::default());
        let manager = manager(true, control.clone());

        manager.dispatch(r#"{"e":"u"}"#);
        manager.dispatch(r#"{"e":"r"}"#);
        manager.dispatch(r#"{"e":"x"}"#);
        manager.dispatch("garbage");

        assert_eq!(*control.calls.lock().unwrap(), vec!["update", "restart"]);
    }

    #[tokio::test]
    async fn update_is_skipped_when_autoupdate_is_disabled() {
        let control = Arc::new(RecordingControl::default());
        let manager = manager(false, control.clone());

        manager.dispatch(r#"{"e":"u"}"#);
        manager.dispatch(r#"{"e":"r"}"#);

        assert_eq!(*control.calls.lock().unwrap(), vec!["restart"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_drops_envelopes_without_a_grace_window_and_keeps_them_with_one() {
        let control = Arc::new(RecordingControl::default());
        let config = Config::from_toml_str("[agent]\nkey = \"k\"\n").unwrap();
        let auth = AuthClient::new(&config, &HostMetadata::default()).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let buffer = OutboundBuffer::new(Duration::from_secs(120));
        let mut manager = ConnectionManager::new(
            &config,
            auth,
            control,
            buffer.clone(),
            rx,
            CancellationToken::new(),
        );

        tx.send(Envelope::line("dropped".to_string(), "/var/log/a.log"))
            .await
            .unwrap();
        assert!(manager.idle(Duration::from_millis(10)).await);
        assert!(buffer.is_empty());

        buffer.arm_grace();
        tx.send(Envelope::line("kept".to_string(), "/var/log/a.log"))
            .await
            .unwrap();
        assert!(manager.idle(Duration::from_millis(10)).await);
        assert_eq!(buffer.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_idle_returns_false() {
        let control = Arc::new(RecordingControl::default());
        let manager_cancel = CancellationToken::new();
        let config = Config::from_toml_str("[agent]\nkey = \"k\"\n").unwrap();
        let auth = AuthClient::new(&config, &HostMetadata::default()).unwrap();
        let (_tx, rx) = mpsc::channel(1);
        let mut manager = ConnectionManager::new(
            &config,
            auth,
            control,
            OutboundBuffer::new(Duration::from_secs(120)),
            rx,
            manager_cancel.clone(),
        );

        manager_cancel.cancel();
        assert!(!manager.idle(Duration::from_secs(3600)).await);
    }
}
