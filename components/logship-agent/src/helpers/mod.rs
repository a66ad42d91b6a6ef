pub mod host_metadata;
pub mod load_config;
pub mod process_control;
pub mod shutdown;
