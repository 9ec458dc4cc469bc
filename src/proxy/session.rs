//! One admitted session: a worker process wired to the session's streams.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, error, info, instrument};

use crate::config::WorkerConfig;
use crate::error::{constants, Result};
use crate::proxy::admission::AdmissionPool;
use crate::utils::metrics::global_metrics;

/// Environment variable carrying the authenticated team member
pub const ENV_GITHUB_USER: &str = "GITHUB_USER";
/// Environment variable carrying the user name presented to the transport
pub const ENV_SSH_USER: &str = "SSH_USER";
/// Environment variable carrying the fingerprint of the authenticating key
pub const ENV_PUB_KEY_HASH: &str = "PUB_KEY_HASH";

/// Who is on the other end of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub github_user: String,
    pub ssh_user: String,
    pub key_fingerprint: String,
}

impl SessionIdentity {
    fn env(&self) -> [(&'static str, &str); 3] {
        [
            (ENV_GITHUB_USER, &self.github_user),
            (ENV_SSH_USER, &self.ssh_user),
            (ENV_PUB_KEY_HASH, &self.key_fingerprint),
        ]
    }
}

/// How worker processes are started.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl WorkerLauncher {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        Ok(Self::new(config.resolve_program()?, config.args.clone()))
    }

    fn command(&self, identity: &SessionIdentity) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(identity.env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Admit a session, run one worker for it and return the session's exit status.
///
/// Without a free slot in time the session gets "Too many connections" on
/// `stderr` and status 1, and no worker is started. Otherwise the status is the
/// worker's own, or 1 when it could not be started or died from a signal.
#[instrument(skip_all, fields(github_user = %identity.github_user, ssh_user = %identity.ssh_user))]
pub async fn run_session<I, O, E>(
    admission: &AdmissionPool,
    launcher: &WorkerLauncher,
    identity: &SessionIdentity,
    mut stdin: I,
    mut stdout: O,
    mut stderr: E,
) -> u32
where
    I: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    global_metrics().session_opened();
    debug!("new session");

    let _permit = match admission.acquire().await {
        Ok(permit) => permit,
        Err(err) => {
            info!(error = %err, "Session rejected");
            let _ = stderr
                .write_all(constants::MSG_TOO_MANY_CONNECTIONS.as_bytes())
                .await;
            let _ = stderr.flush().await;
            return 1;
        }
    };

    let mut child = match launcher.command(identity).spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(program = %launcher.program.display(), error = %err, "nix-daemon failed to start");
            global_metrics().worker_failed();
            return 1;
        }
    };

    // Piped above, so always present.
    let (Some(mut child_stdin), Some(mut child_stdout), Some(mut child_stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        global_metrics().worker_failed();
        return 1;
    };

    let input = async move {
        if let Err(err) = tokio::io::copy(&mut stdin, &mut child_stdin).await {
            debug!(error = %err, "session input closed");
        }
        // Dropping the pipe closes the worker's stdin.
    };

    let output = async {
        let out = async {
            let _ = tokio::io::copy(&mut child_stdout, &mut stdout).await;
            let _ = stdout.flush().await;
        };
        let err = async {
            let _ = tokio::io::copy(&mut child_stderr, &mut stderr).await;
            let _ = stderr.flush().await;
        };
        tokio::join!(out, err);
        child.wait().await
    };

    tokio::pin!(input, output);
    let status = tokio::select! {
        status = &mut output => status,
        _ = &mut input => (&mut output).await,
    };

    match status {
        Ok(status) if status.success() => {
            debug!(%status, "nix-daemon returned");
            0
        }
        Ok(status) => {
            error!(%status, "nix-daemon failed");
            global_metrics().worker_failed();
            status
                .code()
                .and_then(|code| u32::try_from(code).ok())
                .filter(|code| *code != 0)
                .unwrap_or(1)
        }
        Err(err) => {
            error!(error = %err, "waiting for nix-daemon");
            global_metrics().worker_failed();
            1
        }
    }
}
