//! File tailing: one polling reader per discovered file.

pub mod framing;
pub mod manager;
pub mod models;
pub mod tailer;
