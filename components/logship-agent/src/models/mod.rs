//! Data exchanged with the log server.

pub mod control;
pub mod envelope;
