//! Content digest of a configuration value.

use crate::config::Config;
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fmt;

/// SHA-256 of a configuration's canonical JSON rendering.
///
/// Two configurations with the same semantic content produce the same
/// digest regardless of the source layout (key order in the file, comments,
/// whitespace). Map-valued settings are ordered so the rendering is stable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConfigDigest([u8; 32]);

impl ConfigDigest {
    /// Computes the digest of a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialised.
    pub fn of(config: &Config) -> Result<Self> {
        let rendered = serde_json::to_vec(config)?;
        Ok(Self(Sha256::digest(&rendered).into()))
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the digest as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigDigest({})", &self.to_hex()[..12])
    }
}
