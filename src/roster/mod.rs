//! # Trust Roster
//!
//! The set of public keys allowed to log in, each tied to the identity of the
//! team member who owns it. The roster is rebuilt wholesale from a
//! [`RosterSource`] on every refresh and swapped in as one snapshot, so
//! authentication never waits on a refresh in progress.

pub mod github;
pub mod keys;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, instrument};

use crate::error::{constants, Result};
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout_error;

pub use github::GithubRosterSource;
pub use keys::AuthorizedKey;

/// One team member as reported by the roster source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamMember {
    pub login: String,
    /// Keys in `authorized_keys` form
    pub keys: Vec<String>,
}

/// Provider of the current team membership.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn fetch_members(&self) -> Result<Vec<TeamMember>>;
}

/// A trusted key and the identity it authenticates as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub login: String,
    pub key: AuthorizedKey,
}

type Snapshot = Arc<HashMap<String, RosterEntry>>;

/// Fingerprint-indexed set of trusted keys.
#[derive(Debug, Default)]
pub struct TrustRoster {
    entries: RwLock<Snapshot>,
}

/// Outcome of one refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub stored: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub total: usize,
}

impl TrustRoster {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Snapshot {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn get(&self, fingerprint: &str) -> Option<RosterEntry> {
        self.snapshot().get(fingerprint).cloned()
    }

    /// Find the entry whose key blob is byte-identical to `blob`.
    ///
    /// Scans every entry rather than looking up the fingerprint.
    pub fn authenticate(&self, blob: &[u8]) -> Option<RosterEntry> {
        self.snapshot()
            .values()
            .find(|entry| entry.key.blob() == blob)
            .cloned()
    }

    /// Replace the roster with exactly the keys of `members`.
    ///
    /// Keys already present keep their existing identity. Keys that fail to
    /// parse are logged and skipped.
    pub fn replace(&self, members: &[TeamMember]) -> RefreshSummary {
        let previous = self.snapshot();
        let mut next = HashMap::new();
        let mut summary = RefreshSummary::default();

        for member in members {
            for line in &member.keys {
                let key = match AuthorizedKey::parse(line) {
                    Ok(key) => key,
                    Err(err) => {
                        error!(login = %member.login, error = %err, "while parsing key");
                        summary.skipped += 1;
                        continue;
                    }
                };
                let fingerprint = key.fingerprint();
                if next.contains_key(&fingerprint) {
                    continue;
                }
                let entry = match previous.get(&fingerprint) {
                    Some(existing) => existing.clone(),
                    None => {
                        debug!(key = %fingerprint, login = %member.login, "stored new key");
                        summary.stored += 1;
                        RosterEntry {
                            login: member.login.clone(),
                            key,
                        }
                    }
                };
                next.insert(fingerprint, entry);
            }
        }

        for (fingerprint, entry) in previous.iter() {
            if !next.contains_key(fingerprint) {
                debug!(key = %fingerprint, login = %entry.login, "deleted old key");
                summary.deleted += 1;
            }
        }

        summary.total = next.len();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        summary
    }
}

/// Keeps a roster in step with its source.
pub struct RosterSync {
    roster: Arc<TrustRoster>,
    source: Arc<dyn RosterSource>,
    query_timeout: Duration,
}

impl RosterSync {
    pub fn new(
        roster: Arc<TrustRoster>,
        source: Arc<dyn RosterSource>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            roster,
            source,
            query_timeout,
        }
    }

    pub fn roster(&self) -> &Arc<TrustRoster> {
        &self.roster
    }

    /// Query the source once and replace the roster with the result.
    #[instrument(level = "debug", skip(self))]
    pub async fn sync_once(&self) -> Result<RefreshSummary> {
        debug!("fetching team keys");
        let members = with_timeout_error(self.source.fetch_members(), self.query_timeout)
            .await
            .map_err(|e| e.context(constants::ERR_ROSTER_QUERY))?;

        let summary = self.roster.replace(&members);
        global_metrics().roster_refreshed(summary.total);
        info!(
            members = members.len(),
            keys = summary.total,
            stored = summary.stored,
            deleted = summary.deleted,
            skipped = summary.skipped,
            "Roster refreshed"
        );
        global_metrics().log_metrics();
        Ok(summary)
    }

    /// Refresh every `interval`, starting one interval from now.
    ///
    /// Only returns on the first failed refresh.
    pub async fn run(self, interval: Duration) -> Result<()> {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(ticker);

        while ticks.next().await.is_some() {
            self.sync_once().await?;
        }
        Ok(())
    }
}
