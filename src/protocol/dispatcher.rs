//! Operation dispatch loop.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info_span, Instrument};

use crate::core::wire;
use crate::error::{constants, RelayError, Result};
use crate::protocol::handshake::{server_handshake, ClientHello};
use crate::protocol::opcode::{describe, WorkerOp};
use crate::protocol::session::ProtocolSession;

impl<R, W> ProtocolSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Run the handshake on this session's streams.
    pub async fn handshake(&mut self) -> Result<ClientHello> {
        self.check()?;
        let result = server_handshake(&mut self.reader, &mut self.writer).await;
        let hello = self.record(result)?;
        self.client_version = Some(hello.client_version);
        Ok(hello)
    }

    /// Serve operations until the client closes the stream or one fails.
    ///
    /// End-of-stream before an opcode is a clean end. The loop never continues
    /// past an operation that set the sticky error.
    pub async fn serve(&mut self) -> Result<()> {
        self.check()?;

        loop {
            let code = match wire::read_u64_or_eof(&mut self.reader).await {
                Ok(Some(code)) => code,
                Ok(None) => {
                    debug!("Client closed the session");
                    return Ok(());
                }
                Err(err) => {
                    let err = err.context(constants::ERR_READ_OPERATION);
                    self.fail(err.clone());
                    return Err(err);
                }
            };

            let span = info_span!("operation", op = %describe(code));
            let result = self.dispatch(code).instrument(span).await;
            if let Err(err) = result {
                self.fail(err);
            }
            // A failed flush lands in the slot, checked right below.
            let _ = self.flush().await;

            self.check()?;
        }
    }

    async fn dispatch(&mut self, code: u64) -> Result<()> {
        match WorkerOp::from_code(code) {
            Some(WorkerOp::IsValidPath) => self.is_valid_path().await,
            Some(WorkerOp::QueryValidPaths) => self.query_valid_paths().await,
            Some(WorkerOp::AddTempRoot) => self.add_temp_root().await,
            Some(WorkerOp::QueryMissing) => self.query_missing().await,
            Some(WorkerOp::QueryPathInfo) => self.query_path_info().await,
            Some(WorkerOp::RegisterDrvOutput) => self.register_drv_output().await,
            Some(WorkerOp::AddMultipleToStore) => self.add_multiple_to_store().await,
            _ => Err(RelayError::UnknownOperation(describe(code))),
        }
    }
}
