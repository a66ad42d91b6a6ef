// External crates
use lazy_static::lazy_static;
use prometheus::{
    Gauge, IntCounter, IntCounterVec, IntGauge, register_gauge, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};

lazy_static! {
    // ======== Delivery Metrics ========

    /// Envelopes written to the log server connection, by kind
    pub static ref ENVELOPES_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        "logship_envelopes_sent_total",
        "Envelopes written to the log server connection",
        &["kind"]
    ).unwrap();

    /// Envelopes held in the outbound buffer while disconnected
    pub static ref ENVELOPES_BUFFERED_TOTAL: IntCounter = register_int_counter!(
        "logship_envelopes_buffered_total",
        "Envelopes held in the outbound buffer while disconnected"
    ).unwrap();

    /// Envelopes dropped because no grace window was armed or it expired
    pub static ref ENVELOPES_DROPPED_TOTAL: IntCounter = register_int_counter!(
        "logship_envelopes_dropped_total",
        "Envelopes dropped while disconnected outside of the grace window"
    ).unwrap();

    /// Current outbound buffer depth
    pub static ref BUFFER_DEPTH: IntGauge = register_int_gauge!(
        "logship_buffer_depth",
        "Envelopes currently waiting in the outbound buffer"
    ).unwrap();

    /// Whole-buffer discards after the grace window expired
    pub static ref BUFFER_DISCARDS_TOTAL: IntCounter = register_int_counter!(
        "logship_buffer_discards_total",
        "Outbound buffer discards after grace window expiry"
    ).unwrap();

    // ======== Connection Metrics ========

    /// Authentication attempts, by outcome
    pub static ref AUTH_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "logship_auth_attempts_total",
        "Authentication attempts against the API host",
        &["outcome"]
    ).unwrap();

    /// Transport failures, by classification
    pub static ref TRANSPORT_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "logship_transport_errors_total",
        "Log server connection failures",
        &["class"]
    ).unwrap();

    /// Successful connections, including the first one
    pub static ref CONNECTIONS_TOTAL: IntCounter = register_int_counter!(
        "logship_connections_total",
        "Successful log server connections"
    ).unwrap();

    /// 1 while connected to the log server
    pub static ref CONNECTED: IntGauge = register_int_gauge!(
        "logship_connected",
        "Whether the agent currently holds a log server connection"
    ).unwrap();

    // ======== Source Metrics ========

    /// Files currently tailed
    pub static ref TAILED_FILES: IntGauge = register_int_gauge!(
        "logship_tailed_files",
        "Log files currently being tailed"
    ).unwrap();

    /// Rotations or truncations detected by tailers
    pub static ref ROTATIONS_TOTAL: IntCounter = register_int_counter!(
        "logship_rotations_total",
        "Log file rotations or truncations detected"
    ).unwrap();

    /// Directory scan failures (unreadable directories or entries)
    pub static ref DISCOVERY_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "logship_discovery_errors_total",
        "Unreadable directories or entries skipped during discovery"
    ).unwrap();

    // ======== System Resource Metrics ========

    /// Memory footprint in bytes, updated with every stats heartbeat
    pub static ref MEMORY_BYTES: Gauge = register_gauge!(
        "logship_memory_bytes",
        "Resident memory usage in bytes"
    ).unwrap();
}
