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


//! Container remux
//!
//! Concatenated transport-stream bytes are not a seekable MP4. The remux step
//! rewrites the container with stream copy (no re-encode):
//!
//! `ffmpeg -y -fflags +discardcorrupt -i concat.ts -c:v copy -c:a copy out.mp4`
//!
//! FFmpeg must be installed and on PATH unless an explicit binary is
//! configured.

use crate::config::EngineConfig;
use crate::error::{ArchiveError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Lines of ffmpeg stderr kept in a failure message
const STDERR_TAIL_LINES: usize = 5;

/// Rewrites `input` into `output` without re-encoding
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn remux(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Remuxer backed by the ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegRemuxer {
    program: PathBuf,
}

impl FfmpegRemuxer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.ffmpeg_path.clone())
    }

    /// Arguments passed to ffmpeg (program name excluded)
    fn build_args(input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-fflags".to_string(),
            "+discardcorrupt".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    fn stderr_tail(stderr: &[u8]) -> String {
        let text = String::from_utf8_lossy(stderr);
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join(" | ")
    }
}

impl Default for FfmpegRemuxer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, input: &Path, output: &Path) -> Result<()> {
        if !input.exists() {
            return Err(ArchiveError::FileNotFound(format!(
                "{}: Remux input does not exist",
                input.display()
            )));
        }

        let args = Self::build_args(input, output);
        debug!(program = %self.program.display(), ?args, "running remux");

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ArchiveError::RemuxToolNotFound(self.program.display().to_string())
                } else {
                    ArchiveError::RemuxFailed(format!("Failed to execute ffmpeg: {}", e))
                }
            })?;

        if !result.status.success() {
            return Err(ArchiveError::RemuxFailed(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                Self::stderr_tail(&result.stderr)
            )));
        }

        if !output.exists() {
            return Err(ArchiveError::RemuxFailed(
                "Output file was not created".to_string(),
            ));
        }

        Ok(())
    }
}
