//! # Session Proxy
//!
//! Admission control and worker process wiring for authenticated sessions.

pub mod admission;
pub mod session;

pub use admission::{AdmissionPool, SessionPermit};
pub use session::{run_session, SessionIdentity, WorkerLauncher};
