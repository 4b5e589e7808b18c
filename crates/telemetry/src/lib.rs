//! Structured logging for the gate node.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};
