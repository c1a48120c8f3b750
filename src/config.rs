// Longtail Archiver - Broadcast Episode Archiver
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Engine configuration
//!
//! All knobs of the acquisition engine live in [`EngineConfig`]. The struct is
//! serde-friendly so a desktop front-end can persist it as JSON; durations are
//! stored as whole milliseconds.

use crate::download::retry::RetryPolicy;
use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default permit-pool capacity (simultaneous network operations)
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Default streamed write buffer size
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Acquisition engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the shared permit pool
    pub max_concurrent_requests: usize,

    /// Timeout applied to each metadata probe
    #[serde(with = "duration_ms")]
    pub probe_timeout: Duration,

    /// Extra probe attempts after a timeout (not used for 4xx/5xx)
    pub probe_retries: u32,

    /// Attempt budget for a single transfer; `None` retries transient failures forever
    pub max_transfer_attempts: Option<u32>,

    /// Base delay for exponential backoff between transfer attempts
    #[serde(with = "duration_ms")]
    pub retry_base_delay: Duration,

    /// Upper bound for backoff delays
    #[serde(with = "duration_ms")]
    pub retry_max_delay: Duration,

    /// Buffer size for streamed writes
    pub chunk_size: usize,

    /// User agent sent with every request
    pub user_agent: String,

    /// FFmpeg binary used for the remux step
    pub ffmpeg_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            probe_timeout: Duration::from_secs(10),
            probe_retries: 3,
            max_transfer_attempts: None,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            chunk_size: DEFAULT_CHUNK_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file; absent fields keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            ArchiveError::InvalidConfiguration(format!("{}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_requests == 0 {
            return Err(ArchiveError::InvalidConfiguration(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ArchiveError::InvalidConfiguration(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.max_transfer_attempts == Some(0) {
            return Err(ArchiveError::InvalidConfiguration(
                "max_transfer_attempts must be at least 1 when set".to_string(),
            ));
        }
        if self.retry_base_delay > self.retry_max_delay {
            return Err(ArchiveError::InvalidConfiguration(format!(
                "retry_base_delay ({:?}) exceeds retry_max_delay ({:?})",
                self.retry_base_delay, self.retry_max_delay
            )));
        }
        Ok(())
    }

    /// Retry policy for transfers derived from this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_transfer_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            jitter: true,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
