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


//! Per-target transfer with resume and fallback
//!
//! 1. Try `resumable_fetch` into the target's destination.
//! 2. On `NotResumable`: a destination left by an earlier run is taken as
//!    complete; otherwise the body is fetched whole and written in one go.
//! 3. Anything else propagates as the target's failure.

use crate::download::client::FetchClient;
use crate::download::progress::{ProgressTracker, TransferReporter};
use crate::error::Result;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// One physical resumable transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    pub source_url: String,
    pub destination: PathBuf,
}

impl TransferTarget {
    pub fn new(source_url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            destination: destination.into(),
        }
    }
}

/// One segment of a segmented stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Playback position; assembly order
    pub index: usize,
    pub url: String,
    /// Where the segment bytes are kept until assembly
    pub temp_path: PathBuf,
}

impl Segment {
    /// Segment `index` of the job producing `output`
    pub fn for_output(output: &Path, index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
            temp_path: segment_temp_path(output, index),
        }
    }

    pub fn target(&self) -> TransferTarget {
        TransferTarget::new(self.url.clone(), self.temp_path.clone())
    }
}

/// `<output>.chunk.<index>`: the on-disk cache slot for one segment of one job
pub fn segment_temp_path(output: &Path, index: usize) -> PathBuf {
    append_suffix(output, &format!(".chunk.{}", index))
}

/// `path` with `suffix` appended to its final component
pub(crate) fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// How a target ended up complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Ranged transfer (possibly continuing an earlier partial file)
    Resumed,
    /// Origin cannot resume and a file from an earlier run was kept as is
    ReusedExisting,
    /// Origin cannot resume; fetched whole and written in one go
    FellBack,
}

/// Drives a single target through resume or fallback
#[derive(Debug, Clone)]
pub struct TransferManager {
    client: FetchClient,
}

impl TransferManager {
    pub fn new(client: FetchClient) -> Self {
        Self { client }
    }

    pub async fn transfer(
        &self,
        target: &TransferTarget,
        tracker: Option<Arc<ProgressTracker>>,
    ) -> Result<TransferOutcome> {
        let mut reporter = TransferReporter::new(tracker);

        match self
            .client
            .resumable_fetch(&target.source_url, &target.destination, &mut reporter)
            .await
        {
            Ok(()) => Ok(TransferOutcome::Resumed),
            Err(e) if e.is_not_resumable() => self.fallback(target, &mut reporter, e.to_string()).await,
            Err(e) => Err(e),
        }
    }

    async fn fallback(
        &self,
        target: &TransferTarget,
        reporter: &mut TransferReporter,
        reason: String,
    ) -> Result<TransferOutcome> {
        if let Ok(metadata) = tokio::fs::metadata(&target.destination).await {
            info!(
                path = %target.destination.display(),
                "origin cannot resume; keeping file from earlier run"
            );
            reporter.report_position(metadata.len());
            return Ok(TransferOutcome::ReusedExisting);
        }

        debug!(url = %target.source_url, reason = %reason, "falling back to whole-body download");
        let bytes = self
            .client
            .fetch_bytes_non_resumable(&target.source_url, reporter)
            .await?;

        // Written beside the destination and renamed so an interrupted write
        // never looks like a finished file on the next run.
        let staging = append_suffix(&target.destination, ".part");
        tokio::fs::write(&staging, &bytes).await?;
        tokio::fs::rename(&staging, &target.destination).await?;

        Ok(TransferOutcome::FellBack)
    }
}
