//! Client configuration, loaded from a RON file.
//!
//! ```ron
//! (
//!     platform_url: "https://abc.platform.example",
//!     storage_bucket: "resources",
//!     upload: (max_bytes: 10485760),
//!     channels: (sessions: "session-updates", resources: "resource-updates"),
//! )
//! ```
//!
//! Every field is optional; missing ones fall back to [`constants`](crate::constants).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{
    ALLOWED_UPLOAD_TYPES, DEFAULT_PLATFORM_URL, DEFAULT_STORAGE_BUCKET, MAX_UPLOAD_BYTES,
    RESOURCE_CHANNEL, SESSION_CHANNEL,
};

/// Error type for config loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub platform_url: String,
    pub storage_bucket: String,
    pub upload: UploadLimits,
    pub channels: ChannelNames,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            platform_url: DEFAULT_PLATFORM_URL.to_string(),
            storage_bucket: DEFAULT_STORAGE_BUCKET.to_string(),
            upload: UploadLimits::default(),
            channels: ChannelNames::default(),
        }
    }
}

/// Constraints checked before any upload reaches object storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_bytes: MAX_UPLOAD_BYTES,
            allowed_content_types: ALLOWED_UPLOAD_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl UploadLimits {
    pub fn allows(&self, content_type: &str) -> bool {
        self.allowed_content_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(content_type))
    }
}

/// Channel name prefixes per entity kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelNames {
    pub sessions: String,
    pub resources: String,
}

impl Default for ChannelNames {
    fn default() -> Self {
        Self {
            sessions: SESSION_CHANNEL.to_string(),
            resources: RESOURCE_CHANNEL.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_ron(&text)?;
        tracing::debug!(path = %path.display(), "loaded client config");
        Ok(config)
    }
}
