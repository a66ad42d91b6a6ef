//! Startup discovery of log files. Directories are scanned once; files created
//! afterwards are not picked up until the agent restarts.

pub mod discovery;
