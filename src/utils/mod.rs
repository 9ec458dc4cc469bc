//! # Utility Modules
//!
//! Supporting utilities for logging, metrics and timing.
//!
//! ## Components
//! - **Logging**: Subscriber setup for development and production output
//! - **Metrics**: Thread-safe session, login and roster counters
//! - **Timeout**: Default durations and async timeout wrappers

pub mod logging;
pub mod metrics;
pub mod timeout;
