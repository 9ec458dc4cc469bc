//! # SSH Transport
//!
//! The remote-shell surface clients connect to. Every connection is
//! authenticated by public key against the trust roster; each exec or shell
//! request on an authenticated connection becomes one proxied session.
//!
//! ## Responsibilities
//! - Accept TCP connections and run the SSH server side on them
//! - Authenticate offered keys by exact key bytes
//! - Bridge channel data to and from the session's worker

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Config, Handle, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodSet};
use russh_keys::key::{KeyPair, PublicKey};
use russh_keys::PublicKeyBase64;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::error::{RelayError, Result};
use crate::proxy::{run_session, AdmissionPool, SessionIdentity, WorkerLauncher};
use crate::roster::{keys, TrustRoster};
use crate::utils::metrics::global_metrics;

const CHANNEL_BUFFER: usize = 1024 * 1024;
const PUMP_CHUNK: usize = 32 * 1024;

/// State shared by every connection.
pub struct RelayState {
    pub roster: Arc<TrustRoster>,
    pub admission: AdmissionPool,
    pub launcher: WorkerLauncher,
}

/// Load the host key from an OpenSSH private key file.
pub fn load_host_key(path: &Path) -> Result<KeyPair> {
    russh_keys::load_secret_key(path, None).map_err(|e| {
        RelayError::ConfigError(format!("couldn't load host key {}: {e}", path.display()))
    })
}

/// russh server settings: public-key auth only, presenting `host_key`.
pub fn server_config(config: &ServerConfig, host_key: KeyPair) -> Config {
    Config {
        keys: vec![host_key],
        methods: MethodSet::PUBLICKEY,
        auth_rejection_time: config.auth_rejection_time,
        auth_rejection_time_initial: Some(std::time::Duration::ZERO),
        ..Default::default()
    }
}

/// Serve SSH on `config.listen_address` until `shutdown` is cancelled.
pub async fn serve(
    config: &ServerConfig,
    host_key: KeyPair,
    state: Arc<RelayState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(&config.listen_address).await?;
    info!(address = %listener.local_addr()?, "SSH server listening");
    serve_listener(listener, server_config(config, host_key), state, shutdown).await
}

/// Accept loop over an already-bound listener.
pub async fn serve_listener(
    listener: TcpListener,
    config: Config,
    state: Arc<RelayState>,
    shutdown: CancellationToken,
) -> Result<()> {
    let config = Arc::new(config);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.cancelled() => {
                info!("SSH server shutting down");
                return Ok(());
            }
        };
        debug!(%peer, "Accepted connection");

        let config = config.clone();
        let handler = ConnectionHandler::new(state.clone(), peer);
        tokio::spawn(async move {
            match russh::server::run_stream(config, stream, handler).await {
                Ok(session) => {
                    if let Err(e) = session.await {
                        debug!(%peer, error = %e, "Connection ended with error");
                    }
                }
                Err(e) => warn!(%peer, error = %e, "SSH handshake failed"),
            }
        });
    }
}

/// Per-connection SSH state.
pub struct ConnectionHandler {
    state: Arc<RelayState>,
    peer: SocketAddr,
    identity: Option<SessionIdentity>,
    stdin: Option<DuplexStream>,
    started: bool,
}

impl ConnectionHandler {
    fn new(state: Arc<RelayState>, peer: SocketAddr) -> Self {
        Self {
            state,
            peer,
            identity: None,
            stdin: None,
            started: false,
        }
    }

    fn start_session(&mut self, channel: ChannelId, session: &mut Session) -> bool {
        let Some(identity) = self.identity.clone() else {
            return false;
        };
        // One worker per connection.
        if self.started {
            return false;
        }
        self.started = true;

        let (stdin_tx, stdin_rx) = tokio::io::duplex(CHANNEL_BUFFER);
        let (stdout_tx, stdout_rx) = tokio::io::duplex(CHANNEL_BUFFER);
        let (stderr_tx, stderr_rx) = tokio::io::duplex(CHANNEL_BUFFER);
        self.stdin = Some(stdin_tx);

        let state = self.state.clone();
        let handle = session.handle();
        tokio::spawn(async move {
            let run = run_session(
                &state.admission,
                &state.launcher,
                &identity,
                stdin_rx,
                stdout_tx,
                stderr_tx,
            );
            let (code, _, _) = tokio::join!(
                run,
                pump(stdout_rx, handle.clone(), channel, None),
                pump(stderr_rx, handle.clone(), channel, Some(1)),
            );

            let _ = handle.exit_status_request(channel, code).await;
            let _ = handle.eof(channel).await;
            let _ = handle.close(channel).await;
            debug!(exit_status = code, "end session");
        });
        true
    }
}

/// Forward everything from `source` to the channel, as extended data of type
/// `ext` when given.
async fn pump<S>(mut source: S, handle: Handle, channel: ChannelId, ext: Option<u32>)
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; PUMP_CHUNK];
    loop {
        let n = match source.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let data = CryptoVec::from_slice(&buf[..n]);
        let sent = match ext {
            Some(code) => handle.extended_data(channel, code, data).await,
            None => handle.data(channel, data).await,
        };
        if sent.is_err() {
            return;
        }
    }
}

#[async_trait]
impl russh::server::Handler for ConnectionHandler {
    type Error = RelayError;

    #[instrument(level = "debug", skip(self, public_key), fields(peer = %self.peer))]
    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> std::result::Result<Auth, Self::Error> {
        let blob = public_key.public_key_bytes();
        let fingerprint = keys::fingerprint(public_key);

        match self.state.roster.authenticate(&blob) {
            Some(entry) => {
                info!(login = %entry.login, key = %fingerprint, "login allowed");
                global_metrics().login_allowed();
                self.identity = Some(SessionIdentity {
                    github_user: entry.login,
                    ssh_user: user.to_string(),
                    key_fingerprint: fingerprint,
                });
                Ok(Auth::Accept)
            }
            None => {
                info!(key = %fingerprint, "login denied");
                global_metrics().login_denied();
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(self.identity.is_some())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        command: &[u8],
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        debug!(command = %String::from_utf8_lossy(command), "exec request");
        if self.start_session(channel, session) {
            let _ = session.channel_success(channel);
        } else {
            let _ = session.channel_failure(channel);
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        if self.start_session(channel, session) {
            let _ = session.channel_success(channel);
        } else {
            let _ = session.channel_failure(channel);
        }
        Ok(())
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        if let Some(stdin) = self.stdin.as_mut() {
            if let Err(e) = stdin.write_all(data).await {
                error!(error = %e, "worker input closed");
                self.stdin = None;
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> std::result::Result<(), Self::Error> {
        // Closing the writer ends the worker's stdin.
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        Ok(())
    }
}
