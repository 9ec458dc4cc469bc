//! Per-connection protocol state.
//!
//! A `ProtocolSession` owns one client's byte streams and a sticky error slot:
//! the first failure is stored, and every read or write after that returns a
//! copy of it without touching the streams. The dispatch loop checks the slot
//! after each operation and stops once it is set.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::config::STDERR_LAST;
use crate::core::wire;
use crate::error::{RelayError, Result};
use crate::store::PathInfoStore;

pub struct ProtocolSession<R, W> {
    pub(crate) reader: R,
    pub(crate) writer: W,
    pub(crate) store: Arc<dyn PathInfoStore>,
    pub(crate) client_version: Option<u64>,
    err: Option<RelayError>,
}

impl<R, W> ProtocolSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, store: Arc<dyn PathInfoStore>) -> Self {
        Self {
            reader,
            writer,
            store,
            client_version: None,
            err: None,
        }
    }

    /// Protocol version announced by the client, once the handshake ran.
    pub fn client_version(&self) -> Option<u64> {
        self.client_version
    }

    /// The stored failure, if any.
    pub fn error(&self) -> Option<&RelayError> {
        self.err.as_ref()
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Record `err` unless an earlier failure is already stored.
    pub(crate) fn fail(&mut self, err: RelayError) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    pub(crate) fn check(&self) -> Result<()> {
        match &self.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.fail(err.clone());
        }
        result
    }

    pub(crate) async fn read_u64(&mut self) -> Result<u64> {
        self.check()?;
        let result = wire::read_u64(&mut self.reader).await;
        self.record(result)
    }

    pub(crate) async fn read_bool(&mut self) -> Result<bool> {
        self.check()?;
        let result = wire::read_bool(&mut self.reader).await;
        self.record(result)
    }

    pub(crate) async fn read_string(&mut self, max: u64) -> Result<String> {
        self.check()?;
        let result = wire::read_string(&mut self.reader, max).await;
        self.record(result)
    }

    pub(crate) async fn read_strings(&mut self) -> Result<Vec<String>> {
        self.check()?;
        let result = wire::read_strings(&mut self.reader).await;
        self.record(result)
    }

    pub(crate) async fn write_u64(&mut self, value: u64) -> Result<()> {
        self.check()?;
        let result = wire::write_u64(&mut self.writer, value).await;
        self.record(result)
    }

    pub(crate) async fn write_bool(&mut self, value: bool) -> Result<()> {
        self.check()?;
        let result = wire::write_bool(&mut self.writer, value).await;
        self.record(result)
    }

    pub(crate) async fn write_strings<S: AsRef<str>>(&mut self, values: &[S]) -> Result<()> {
        self.check()?;
        let result = wire::write_strings(&mut self.writer, values).await;
        self.record(result)
    }

    /// End the log channel for the current operation.
    pub(crate) async fn write_stderr_last(&mut self) -> Result<()> {
        self.write_u64(STDERR_LAST).await
    }

    pub(crate) async fn flush(&mut self) -> Result<()> {
        self.check()?;
        let result = self.writer.flush().await.map_err(RelayError::from);
        self.record(result)
    }
}
