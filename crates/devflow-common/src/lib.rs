//! # DevFlow Common
//!
//! Shared utilities for the DevFlow offline worker.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - An injectable wall clock so freshness checks can be driven by tests

pub mod clock;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
pub use logging::{init_logging, LogConfig, LogFormat};
