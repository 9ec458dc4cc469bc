//! # Path-Info Store
//!
//! The worker consults an external store for path metadata. The store is
//! queried by exact store path and returns at most one record.
//!
//! ## Backends
//! - **Memory**: A map loaded from a JSON file, used for tests and local runs
//! - **Postgres**: The `ValidPaths`/`Refs` tables of a shared database

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::core::narinfo::PathMetadataRecord;
use crate::error::{RelayError, Result};

pub mod postgres;

pub use postgres::PostgresPathInfoStore;

/// Lookup of path metadata by store path.
#[async_trait]
pub trait PathInfoStore: Send + Sync {
    /// Find the record for `path`, if the store knows it.
    async fn query_path_info(&self, path: &str) -> Result<Option<PathMetadataRecord>>;
}

/// In-memory path-info store.
#[derive(Debug, Default, Clone)]
pub struct MemoryPathInfoStore {
    records: HashMap<String, PathMetadataRecord>,
}

impl MemoryPathInfoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of records.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            RelayError::ConfigError(format!(
                "Failed to read path info file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_json(&contents)
    }

    /// Parse a JSON array of records.
    pub fn from_json(contents: &str) -> Result<Self> {
        let records: Vec<PathMetadataRecord> = serde_json::from_str(contents)
            .map_err(|e| RelayError::ConfigError(format!("Invalid path info JSON: {e}")))?;
        Ok(records.into_iter().collect())
    }

    pub fn insert(&mut self, record: PathMetadataRecord) {
        self.records.insert(record.out_path.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<PathMetadataRecord> for MemoryPathInfoStore {
    fn from_iter<I: IntoIterator<Item = PathMetadataRecord>>(iter: I) -> Self {
        let mut store = Self::new();
        for record in iter {
            store.insert(record);
        }
        store
    }
}

#[async_trait]
impl PathInfoStore for MemoryPathInfoStore {
    async fn query_path_info(&self, path: &str) -> Result<Option<PathMetadataRecord>> {
        let record = self.records.get(path).cloned();
        debug!(path, found = record.is_some(), "memory path info lookup");
        Ok(record)
    }
}
