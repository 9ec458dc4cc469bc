//! OpenSSH authorized-key parsing and fingerprints.

use std::fmt;

use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;

use crate::error::{RelayError, Result};

/// One public key in `authorized_keys` form: `<algorithm> <base64 blob> [comment]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    algorithm: String,
    key: PublicKey,
    blob: Vec<u8>,
    comment: Option<String>,
}

impl AuthorizedKey {
    /// Parse a single key line.
    ///
    /// The key body is decoded in full, and the algorithm named in front of
    /// the blob must match the one encoded inside it.
    pub fn parse(line: &str) -> Result<Self> {
        let mut fields = line.split_whitespace();
        let algorithm = fields
            .next()
            .ok_or_else(|| RelayError::InvalidKey("empty key".into()))?;
        let encoded = fields
            .next()
            .ok_or_else(|| RelayError::InvalidKey(format!("{algorithm}: missing key data")))?;
        let comment = {
            let rest: Vec<&str> = fields.collect();
            (!rest.is_empty()).then(|| rest.join(" "))
        };

        let key = russh_keys::parse_public_key_base64(encoded)
            .map_err(|e| RelayError::InvalidKey(format!("{algorithm}: {e}")))?;
        let blob = key.public_key_bytes();

        let embedded = embedded_algorithm(&blob).unwrap_or_default();
        if embedded != algorithm.as_bytes() {
            return Err(RelayError::InvalidKey(format!(
                "{algorithm}: key data is for {}",
                String::from_utf8_lossy(embedded)
            )));
        }

        Ok(Self {
            algorithm: algorithm.to_string(),
            key,
            blob,
            comment,
        })
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key
    }

    /// The SSH wire encoding of the key.
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.key)
    }
}

impl fmt::Display for AuthorizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.algorithm, self.key.public_key_base64())
    }
}

/// `SHA256:` followed by the unpadded base64 SHA-256 of the key blob, as
/// printed by `ssh-keygen -l`.
pub fn fingerprint(key: &PublicKey) -> String {
    format!("SHA256:{}", key.fingerprint())
}

/// The length-prefixed algorithm name at the start of a key blob.
fn embedded_algorithm(blob: &[u8]) -> Option<&[u8]> {
    let len = u32::from_be_bytes(blob.get(..4)?.try_into().ok()?) as usize;
    blob.get(4..4 + len)
}
