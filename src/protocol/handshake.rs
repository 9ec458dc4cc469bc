//! Worker protocol handshake.
//!
//! The exchange, in order:
//!
//! 1. client → `WORKER_MAGIC_1`
//! 2. worker → `WORKER_MAGIC_2`, `PROTOCOL_VERSION`
//! 3. client → its protocol version (accepted as is)
//! 4. worker → daemon version string, `STDERR_LAST`
//! 5. client → CPU affinity hint, reserve-space flag (both ignored)
//!
//! Any failure aborts the session; there is no partial-handshake recovery.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use crate::config::{DAEMON_VERSION, PROTOCOL_VERSION, STDERR_LAST, WORKER_MAGIC_1, WORKER_MAGIC_2};
use crate::core::wire;
use crate::error::{constants, RelayError, Result, ResultExt};

/// Result of a completed handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHello {
    /// Version the client announced, `major << 8 | minor`
    pub client_version: u64,
}

impl ClientHello {
    pub fn major(&self) -> u64 {
        self.client_version >> 8
    }

    pub fn minor(&self) -> u64 {
        self.client_version & 0xff
    }
}

/// Run the server side of the handshake.
///
/// Nothing is written unless the client's magic matches.
#[instrument(level = "debug", skip_all)]
pub async fn server_handshake<R, W>(reader: &mut R, writer: &mut W) -> Result<ClientHello>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let magic = wire::read_u64(reader)
        .await
        .context(constants::ERR_READ_CLIENT_MAGIC)?;
    if magic != WORKER_MAGIC_1 {
        return Err(RelayError::MagicMismatch {
            expected: WORKER_MAGIC_1,
            got: magic,
        });
    }

    wire::write_u64(writer, WORKER_MAGIC_2)
        .await
        .context(constants::ERR_WRITE_SERVER_MAGIC)?;
    wire::write_u64(writer, PROTOCOL_VERSION)
        .await
        .context(constants::ERR_WRITE_PROTOCOL_VERSION)?;
    writer.flush().await?;

    let client_version = wire::read_u64(reader)
        .await
        .context(constants::ERR_READ_CLIENT_VERSION)?;

    wire::write_string(writer, DAEMON_VERSION)
        .await
        .context(constants::ERR_WRITE_DAEMON_VERSION)?;
    wire::write_u64(writer, STDERR_LAST)
        .await
        .context(constants::ERR_WRITE_STDERR_LAST)?;
    writer.flush().await?;

    let affinity = wire::read_u64(reader)
        .await
        .context(constants::ERR_READ_AFFINITY)?;
    let reserve_space = wire::read_u64(reader)
        .await
        .context(constants::ERR_READ_RESERVE_SPACE)?;

    let hello = ClientHello { client_version };
    debug!(
        major = hello.major(),
        minor = hello.minor(),
        affinity,
        reserve_space,
        "Client handshake complete"
    );

    Ok(hello)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn client_hello(magic: u64, version: u64) -> BytesMut {
        let mut buf = BytesMut::new();
        wire::put_u64(&mut buf, magic);
        wire::put_u64(&mut buf, version);
        wire::put_u64(&mut buf, 0);
        wire::put_u64(&mut buf, 0);
        buf
    }

    fn expected_reply() -> BytesMut {
        let mut buf = BytesMut::new();
        wire::put_u64(&mut buf, WORKER_MAGIC_2);
        wire::put_u64(&mut buf, PROTOCOL_VERSION);
        wire::put_bytes(&mut buf, DAEMON_VERSION.as_bytes());
        wire::put_u64(&mut buf, STDERR_LAST);
        buf
    }

    #[tokio::test]
    async fn wrong_magic_writes_nothing() {
        for magic in [0, 1, WORKER_MAGIC_2, WORKER_MAGIC_1 + 1, u64::MAX] {
            let input = client_hello(magic, PROTOCOL_VERSION);
            let mut reader = &input[..];
            let mut out = Vec::new();
            let err = server_handshake(&mut reader, &mut out).await.unwrap_err();
            assert!(matches!(err, RelayError::MagicMismatch { got, .. } if got == magic));
            assert!(out.is_empty());
        }
    }

    #[tokio::test]
    async fn reply_is_independent_of_client_version() {
        for version in [0, 1 << 8 | 10, PROTOCOL_VERSION, u64::MAX] {
            let input = client_hello(WORKER_MAGIC_1, version);
            let mut reader = &input[..];
            let mut out = Vec::new();
            let hello = server_handshake(&mut reader, &mut out).await.unwrap();
            assert_eq!(hello.client_version, version);
            assert_eq!(out, expected_reply().to_vec());
            assert!(reader.is_empty());
        }
    }

    #[tokio::test]
    async fn missing_client_version_aborts() {
        let mut input = BytesMut::new();
        wire::put_u64(&mut input, WORKER_MAGIC_1);
        let mut reader = &input[..];
        let mut out = Vec::new();
        let err = server_handshake(&mut reader, &mut out).await.unwrap_err();
        assert!(err.is_eof());
        assert!(err.to_string().starts_with(constants::ERR_READ_CLIENT_VERSION));
    }

    #[tokio::test]
    async fn missing_trailing_hints_abort() {
        let mut input = BytesMut::new();
        wire::put_u64(&mut input, WORKER_MAGIC_1);
        wire::put_u64(&mut input, PROTOCOL_VERSION);
        wire::put_u64(&mut input, 0);
        let mut reader = &input[..];
        let mut out = Vec::new();
        let err = server_handshake(&mut reader, &mut out).await.unwrap_err();
        assert!(err.to_string().starts_with(constants::ERR_READ_RESERVE_SPACE));
    }

    #[test]
    fn version_components() {
        let hello = ClientHello {
            client_version: PROTOCOL_VERSION,
        };
        assert_eq!((hello.major(), hello.minor()), (1, 34));
    }
}
