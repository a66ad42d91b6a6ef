//! Host-resident log shipping agent.
//!
//! Discovers log files under the configured directories, tails them and
//! streams every new line to the log server over a single WebSocket, holding
//! data in a time-bounded buffer while the connection is down.

pub mod buffer;
pub mod cli;
pub mod discovery;
pub mod helpers;
pub mod instrumentation;
pub mod metrics;
pub mod models;
pub mod runtime;
pub mod shipper;
pub mod stats;
pub mod tailer;
