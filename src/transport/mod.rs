//! # Transport Layer
//!
//! Network surfaces of the relay.

pub mod ssh;

pub use ssh::{serve, RelayState};
