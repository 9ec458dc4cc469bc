//! Store path metadata records.
//!
//! A record describes one content-addressed store path. On the wire the
//! fields appear in a fixed order:
//!
//! ```text
//! out path, deriver, nar hash, references, registration time,
//! nar size, ultimate, signatures, content address
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::config::{MAX_NARINFO_HASH_LEN, MAX_NARINFO_PATH_LEN};
use crate::core::wire;
use crate::error::{Result, ResultExt};

/// Metadata of one store path, as sent by `AddMultipleToStore` and returned by
/// the path-info store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMetadataRecord {
    pub out_path: String,
    /// Empty when the deriver is unknown
    #[serde(default)]
    pub deriver: String,
    pub nar_hash: String,
    #[serde(default)]
    pub references: Vec<String>,
    /// Seconds since the Unix epoch
    #[serde(default)]
    pub registration_time: u64,
    pub nar_size: u64,
    #[serde(default)]
    pub ultimate: bool,
    #[serde(default)]
    pub sigs: Vec<String>,
    /// Content-addressing tag, empty for input-addressed paths
    #[serde(default)]
    pub ca: String,
}

impl PathMetadataRecord {
    /// Registration time as a `SystemTime`.
    pub fn registered_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.registration_time)
    }

    /// Parse one record from `r`.
    pub async fn read_from<R>(r: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let out_path = wire::read_string(r, MAX_NARINFO_PATH_LEN)
            .await
            .context("reading StorePath")?;
        let deriver = wire::read_string(r, MAX_NARINFO_PATH_LEN)
            .await
            .context("reading Deriver")?;
        let nar_hash = wire::read_string(r, MAX_NARINFO_HASH_LEN)
            .await
            .context("reading NarHash")?;
        let references = wire::read_strings(r).await.context("reading References")?;
        let registration_time = wire::read_u64(r)
            .await
            .context("reading registrationTime")?;
        let nar_size = wire::read_u64(r).await.context("reading narSize")?;
        let ultimate = wire::read_bool(r).await.context("reading ultimate")?;
        let sigs = wire::read_strings(r).await.context("reading Sigs")?;
        let ca = wire::read_string(r, MAX_NARINFO_HASH_LEN)
            .await
            .context("reading CA")?;

        Ok(Self {
            out_path,
            deriver,
            nar_hash,
            references,
            registration_time,
            nar_size,
            ultimate,
            sigs,
            ca,
        })
    }

    /// Append the wire encoding of this record to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        wire::put_bytes(buf, self.out_path.as_bytes());
        wire::put_bytes(buf, self.deriver.as_bytes());
        wire::put_bytes(buf, self.nar_hash.as_bytes());
        wire::put_strings(buf, &self.references);
        wire::put_u64(buf, self.registration_time);
        wire::put_u64(buf, self.nar_size);
        wire::put_bool(buf, self.ultimate);
        wire::put_strings(buf, &self.sigs);
        wire::put_bytes(buf, self.ca.as_bytes());
    }
}
