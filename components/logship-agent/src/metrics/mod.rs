//! Prometheus instrumentation and the optional `/metrics` endpoint.

pub mod http;
pub mod metrics;
