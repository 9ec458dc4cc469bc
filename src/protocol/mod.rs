//! # Worker Protocol
//!
//! The worker side of the daemon protocol, spoken over one duplex byte
//! stream: a fixed handshake followed by a strictly sequential
//! opcode/response loop.
//!
//! ## Components
//! - **opcode**: The table of known operation codes
//! - **handshake**: Magic and version exchange
//! - **session**: Stream ownership and the sticky error slot
//! - **dispatcher**: The opcode loop
//! - **operations**: Handlers for the supported operations

pub mod dispatcher;
pub mod handshake;
pub mod opcode;
pub mod operations;
pub mod session;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::store::PathInfoStore;

pub use handshake::ClientHello;
pub use opcode::WorkerOp;
pub use session::ProtocolSession;

/// Handshake with the client on `reader`/`writer`, then serve it until it
/// disconnects or an operation fails.
#[instrument(level = "debug", skip_all)]
pub async fn run_worker<R, W>(reader: R, writer: W, store: Arc<dyn PathInfoStore>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = ProtocolSession::new(reader, writer, store);
    let hello = session.handshake().await?;
    debug!(client_version = hello.client_version, "Serving operations");
    session.serve().await
}
