//! # Nix Daemon Relay
//!
//! An SSH front door for a Nix binary store. Clients connect with `ssh`,
//! authenticate with a public key belonging to a member of a GitHub team, and
//! are handed to a worker process that speaks the Nix daemon worker protocol
//! on its stdin/stdout.
//!
//! ## Layout
//! - [`core`]: wire codec, framed stream decoder, path metadata records
//! - [`protocol`]: handshake and operation dispatch of the worker
//! - [`store`]: path metadata lookup backends
//! - [`roster`]: trusted keys, synchronised from a GitHub team
//! - [`proxy`]: session admission and worker process wiring
//! - [`transport`]: the SSH listener
//! - [`config`], [`error`], [`utils`]: ambient plumbing

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod roster;
pub mod store;
pub mod transport;
pub mod utils;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
