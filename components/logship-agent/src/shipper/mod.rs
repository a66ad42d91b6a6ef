//! Delivery to the log server: authentication, the WebSocket transport and
//! the connection state machine that owns it.

pub mod auth_client;
pub mod backoff;
pub mod connection_manager;
pub mod errors;
pub mod session;
pub mod transport;
