use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::io::BufWriter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument, Level};

use nix_daemon_relay::config::{LogMode, RelayConfig};
use nix_daemon_relay::error::{RelayError, Result};
use nix_daemon_relay::protocol::run_worker;
use nix_daemon_relay::proxy::session::{ENV_GITHUB_USER, ENV_PUB_KEY_HASH, ENV_SSH_USER};
use nix_daemon_relay::proxy::{AdmissionPool, WorkerLauncher};
use nix_daemon_relay::roster::{GithubRosterSource, RosterSync, TrustRoster};
use nix_daemon_relay::store::{MemoryPathInfoStore, PathInfoStore, PostgresPathInfoStore};
use nix_daemon_relay::transport::{self, ssh, RelayState};
use nix_daemon_relay::utils::logging;

/// SSH relay for the Nix daemon worker protocol
#[derive(Parser, Debug)]
#[command(name = "nix-daemon-relay", version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// One of trace, debug, info, warn, error
    #[arg(long, global = true, env = "LOG_LEVEL")]
    log_level: Option<Level>,

    /// development or production
    #[arg(long, global = true, env = "LOG_MODE")]
    log_mode: Option<LogMode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the SSH listener
    Serve(ServeArgs),
    /// Speak the worker protocol on stdin/stdout
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Listen on this address:port
    #[arg(long = "listen", env = "LISTEN_ADDR")]
    listen_address: Option<String>,

    /// SSH server host key
    #[arg(long = "host-key", env = "HOST_KEY")]
    host_key_path: Option<PathBuf>,

    /// Maximum amount of concurrent sessions
    #[arg(long, env = "MAX_SESSIONS")]
    max_sessions: Option<usize>,

    /// How long new connections may wait for a free session
    #[arg(long, env = "CONNECTION_TIMEOUT")]
    new_connection_timeout: Option<humantime::Duration>,

    /// Synchronize allowed keys from GitHub every interval
    #[arg(long, env = "GITHUB_REFRESH_INTERVAL")]
    github_refresh_interval: Option<humantime::Duration>,

    /// Organization the team is in
    #[arg(long, env = "GITHUB_ORGANIZATION")]
    github_organization: Option<String>,

    /// Fetch keys of the members of this team
    #[arg(long, env = "GITHUB_TEAM")]
    github_team: Option<String>,

    /// GitHub token; takes precedence over the token path
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Read the GitHub token from a file instead
    #[arg(long, env = "GITHUB_TOKEN_PATH")]
    github_token_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct WorkerArgs {
    /// Serve one client on stdin/stdout
    #[arg(long)]
    stdio: bool,

    /// PostgreSQL connection string of the path-info database
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// JSON file of path-info records, used instead of a database
    #[arg(long, env = "PATH_INFO_FILE", conflicts_with = "database_url")]
    path_info_file: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(self, config: &mut RelayConfig) {
        let server = &mut config.server;
        if let Some(v) = self.listen_address {
            server.listen_address = v;
        }
        if let Some(v) = self.host_key_path {
            server.host_key_path = v;
        }
        if let Some(v) = self.max_sessions {
            server.max_sessions = v;
        }
        if let Some(v) = self.new_connection_timeout {
            server.new_connection_timeout = v.into();
        }

        let roster = &mut config.roster;
        if let Some(v) = self.github_refresh_interval {
            roster.refresh_interval = v.into();
        }
        if let Some(v) = self.github_organization {
            roster.organization = v;
        }
        if let Some(v) = self.github_team {
            roster.team = v;
        }
        if let Some(v) = self.github_token {
            roster.token = Some(v);
        }
        if let Some(v) = self.github_token_path {
            roster.token_path = Some(v);
        }
    }
}

fn load_config(cli: &Cli) -> Result<RelayConfig> {
    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(mode) = cli.log_mode {
        config.logging.mode = mode;
    }
    Ok(config)
}

async fn serve(config: RelayConfig) -> Result<()> {
    config.validate_strict()?;

    let roster = Arc::new(TrustRoster::new());
    let source = GithubRosterSource::new(config.roster.clone())?;
    let sync = RosterSync::new(roster.clone(), Arc::new(source), config.roster.query_timeout);
    sync.sync_once()
        .await
        .map_err(|e| e.context("initially syncing github"))?;

    info!(
        address = %config.server.listen_address,
        host_key = %config.server.host_key_path.display(),
        log_level = %config.logging.level,
        log_mode = ?config.logging.mode,
        max_sessions = config.server.max_sessions,
        new_connection_timeout = ?config.server.new_connection_timeout,
        github_sync_interval = ?config.roster.refresh_interval,
        github_team = %config.roster.team,
        github_organization = %config.roster.organization,
        "Starting server"
    );

    let host_key = ssh::load_host_key(&config.server.host_key_path)?;
    let state = Arc::new(RelayState {
        roster,
        admission: AdmissionPool::new(
            config.server.max_sessions,
            config.server.new_connection_timeout,
        ),
        launcher: WorkerLauncher::from_config(&config.worker)?,
    });

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received interrupt");
                shutdown.cancel();
            }
        });
    }

    tokio::select! {
        result = transport::serve(&config.server, host_key, state, shutdown) => result,
        result = sync.run(config.roster.refresh_interval) => {
            result.map_err(|e| e.context("while syncing github"))
        }
    }
}

async fn worker(args: WorkerArgs) -> Result<()> {
    if !args.stdio {
        return Err(RelayError::ConfigError(
            "only --stdio is supported".to_string(),
        ));
    }

    let store: Arc<dyn PathInfoStore> = match (args.database_url, args.path_info_file) {
        (Some(url), _) => Arc::new(PostgresPathInfoStore::connect(&url).await?),
        (None, Some(path)) => Arc::new(MemoryPathInfoStore::from_json_file(path)?),
        (None, None) => {
            return Err(RelayError::ConfigError(
                "--database-url or --path-info-file is required (alternatively environment variables DATABASE_URL or PATH_INFO_FILE)".to_string(),
            ))
        }
    };

    let env = |name: &str| std::env::var(name).unwrap_or_default();
    let span = info_span!(
        "worker",
        github_user = %env(ENV_GITHUB_USER),
        ssh_user = %env(ENV_SSH_USER),
        key = %env(ENV_PUB_KEY_HASH),
    );

    run_worker(tokio::io::stdin(), BufWriter::new(tokio::io::stdout()), store)
        .instrument(span)
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Command::Serve(args) => {
            args.apply(&mut config);
            serve(config).await
        }
        Command::Worker(args) => worker(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Exiting");
            ExitCode::FAILURE
        }
    }
}
