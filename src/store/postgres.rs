//! PostgreSQL path-info backend.
//!
//! Expects the store schema used by the Nix database: a `ValidPaths` table
//! keyed by `path` and a `Refs` table linking referrer and reference ids.

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

use super::PathInfoStore;
use crate::core::narinfo::PathMetadataRecord;
use crate::error::{RelayError, Result};

const SELECT_VALID_PATH: &str = "SELECT id, path, hash, registrationTime, deriver, narSize, ultimate, sigs, ca \
     FROM ValidPaths WHERE path = $1";

const SELECT_REFERENCES: &str = "SELECT v.path FROM Refs r JOIN ValidPaths v ON v.id = r.reference \
     WHERE r.referrer = $1 ORDER BY v.path";

/// Path-info store backed by PostgreSQL.
pub struct PostgresPathInfoStore {
    client: Client,
}

impl PostgresPathInfoStore {
    /// Connect to `url` and drive the connection on a background task.
    pub async fn connect(url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "database connection failed");
            }
        });
        info!("Connected to path info database");
        Ok(Self { client })
    }
}

#[async_trait]
impl PathInfoStore for PostgresPathInfoStore {
    async fn query_path_info(&self, path: &str) -> Result<Option<PathMetadataRecord>> {
        let Some(row) = self.client.query_opt(SELECT_VALID_PATH, &[&path]).await? else {
            debug!(path, "path not registered");
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        let registration_time: i64 = row.try_get("registrationTime")?;
        let nar_size: Option<i64> = row.try_get("narSize")?;
        let sigs: Option<String> = row.try_get("sigs")?;

        let references = self
            .client
            .query(SELECT_REFERENCES, &[&id])
            .await?
            .iter()
            .map(|r| r.try_get::<_, String>(0))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let record = PathMetadataRecord {
            out_path: row.try_get("path")?,
            deriver: row.try_get::<_, Option<String>>("deriver")?.unwrap_or_default(),
            nar_hash: row.try_get("hash")?,
            references,
            registration_time: u64::try_from(registration_time).map_err(|_| {
                RelayError::Lookup(format!("negative registration time for {path}"))
            })?,
            nar_size: nar_size.map(|s| s.max(0) as u64).unwrap_or_default(),
            ultimate: row.try_get::<_, Option<bool>>("ultimate")?.unwrap_or(false),
            sigs: sigs
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            ca: row.try_get::<_, Option<String>>("ca")?.unwrap_or_default(),
        };

        debug!(path, nar_size = record.nar_size, "path info found");
        Ok(Some(record))
    }
}
