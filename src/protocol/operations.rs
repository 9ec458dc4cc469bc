//! Handlers for the operations the worker implements.
//!
//! Every handler reads all of its inputs before writing anything, and ends the
//! log channel with `STDERR_LAST` before its result. Failures land in the
//! session's sticky slot through the session accessors.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, trace, warn};

use crate::config::{
    MAX_PATH_LEN, MAX_REALISATION_LEN, PLACEHOLDER_DOWNLOAD_SIZE, PLACEHOLDER_NAR_SIZE,
};
use crate::core::framed::FramedReader;
use crate::core::narinfo::PathMetadataRecord;
use crate::core::wire;
use crate::error::{constants, RelayError, Result, ResultExt};
use crate::protocol::session::ProtocolSession;

impl<R, W> ProtocolSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Every path is reported valid.
    pub(crate) async fn is_valid_path(&mut self) -> Result<()> {
        let path = self.read_string(MAX_PATH_LEN).await?;
        debug!(%path, "IsValidPath");

        self.write_stderr_last().await?;
        self.write_bool(true).await
    }

    /// No path is reported valid.
    pub(crate) async fn query_valid_paths(&mut self) -> Result<()> {
        let paths = self.read_strings().await?;
        let substitute = self.read_bool().await?;
        debug!(count = paths.len(), substitute, "QueryValidPaths");

        self.write_stderr_last().await?;
        self.write_strings::<&str>(&[]).await
    }

    pub(crate) async fn add_temp_root(&mut self) -> Result<()> {
        let path = self.read_string(MAX_PATH_LEN).await?;
        debug!(%path, "AddTempRoot");

        self.write_stderr_last().await?;
        self.write_u64(1).await
    }

    /// Nothing is built or substituted; every target is reported unknown.
    /// The reply ends with a second `STDERR_LAST`.
    pub(crate) async fn query_missing(&mut self) -> Result<()> {
        let targets = self.read_strings().await?;
        debug!(count = targets.len(), "QueryMissing");

        let will_build: Vec<String> = Vec::new();
        let will_substitute: Vec<String> = Vec::new();
        let mut unknown = will_substitute.clone();
        unknown.extend(targets);

        self.write_stderr_last().await?;
        self.write_strings(&will_build).await?;
        self.write_strings(&will_substitute).await?;
        self.write_strings(&unknown).await?;
        self.write_u64(PLACEHOLDER_DOWNLOAD_SIZE).await?;
        self.write_u64(PLACEHOLDER_NAR_SIZE).await?;
        self.write_stderr_last().await
    }

    /// Looks the path up in the store, then answers `true` whatever it found.
    pub(crate) async fn query_path_info(&mut self) -> Result<()> {
        let path = self.read_string(MAX_PATH_LEN).await?;

        match self.store.query_path_info(&path).await {
            Ok(found) => debug!(%path, found = found.is_some(), "QueryPathInfo"),
            Err(err) => {
                warn!(%path, error = %err, "Path info lookup failed");
                self.fail(err);
            }
        }

        self.write_stderr_last().await?;
        self.write_bool(true).await
    }

    pub(crate) async fn register_drv_output(&mut self) -> Result<()> {
        let realisation = self.read_string(MAX_REALISATION_LEN).await?;
        debug!(len = realisation.len(), "RegisterDrvOutput");

        self.write_stderr_last().await
    }

    pub(crate) async fn add_multiple_to_store(&mut self) -> Result<()> {
        let repair = self.read_bool().await?;
        let dont_check_sigs = self.read_bool().await?;
        debug!(repair, dont_check_sigs, "AddMultipleToStore");

        self.check()?;
        let parsed = {
            let mut framed = FramedReader::new(&mut self.reader);
            parse_source(&mut framed).await
        };
        match parsed {
            Ok(records) => debug!(records, "Consumed framed payload"),
            Err(err) => self.fail(err),
        }

        self.write_stderr_last().await?;
        let status = self
            .read_u64()
            .await
            .context(constants::ERR_READ_EXPECTED)?;
        if status != 0 {
            let err = RelayError::InvalidStatus(status);
            self.fail(err.clone());
            return Err(err);
        }
        Ok(())
    }
}

/// Read a count followed by that many records, each trailed by its NAR bytes.
///
/// End-of-stream in place of the count means an empty upload. The NAR bytes are
/// read and dropped. Returns the number of records consumed.
pub async fn parse_source<S>(source: &mut S) -> Result<u64>
where
    S: AsyncRead + Unpin,
{
    let count = match wire::read_u64(source).await {
        Ok(count) => count,
        Err(err) if err.is_eof() => return Ok(0),
        Err(err) => return Err(err.context(constants::ERR_READ_NARINFO)),
    };

    for _ in 0..count {
        let record = PathMetadataRecord::read_from(source)
            .await
            .context(constants::ERR_READ_NARINFO)?;
        trace!(out_path = %record.out_path, nar_size = record.nar_size, "Narinfo");

        let mut nar = (&mut *source).take(record.nar_size);
        let copied = tokio::io::copy(&mut nar, &mut tokio::io::sink()).await?;
        if copied != record.nar_size {
            return Err(RelayError::ShortNar {
                copied,
                expected: record.nar_size,
            });
        }
    }

    Ok(count)
}
