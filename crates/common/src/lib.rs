//! Common utilities for lumascope-rs
//!
//! This crate provides functionality shared between the driver and the CLI:
//! error handling, logging setup, transfer statistics, and the channel
//! bridge between foreground callers and the streaming worker thread.

pub mod channel;
pub mod error;
pub mod logging;
pub mod stats;

pub use channel::{StreamBridge, StreamCommand, StreamEvent, StreamWorker, create_stream_bridge};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use stats::TransferStats;
