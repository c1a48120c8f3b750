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


//! Download job bookkeeping shared by the segmented and direct entry points

use crate::download::progress::{DownloadState, ProgressCallback, ProgressTracker};
use crate::download::segment::{Segment, TransferTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a job downloads
#[derive(Debug, Clone)]
pub enum JobSource {
    Segments(Vec<Segment>),
    Single(TransferTarget),
}

/// Aggregate root for one output file
#[derive(Debug)]
pub struct DownloadJob {
    pub output_path: PathBuf,
    pub source: JobSource,
    pub progress: Arc<ProgressTracker>,
    pub started_at: DateTime<Utc>,
}

impl DownloadJob {
    pub fn new(output_path: &Path, source: JobSource, callback: Option<ProgressCallback>) -> Self {
        let label = output_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| output_path.display().to_string());

        Self {
            output_path: output_path.to_path_buf(),
            source,
            progress: Arc::new(ProgressTracker::new(label, callback)),
            started_at: Utc::now(),
        }
    }

    pub fn segment_count(&self) -> usize {
        match &self.source {
            JobSource::Segments(segments) => segments.len(),
            JobSource::Single(_) => 0,
        }
    }

    /// Mark the job finished and build its report
    pub fn finish(&self) -> DownloadReport {
        self.progress.set_state(DownloadState::Completed);
        DownloadReport {
            output_path: self.output_path.clone(),
            outcome: DownloadOutcome::Downloaded,
            bytes: self.progress.completed(),
            segments: self.segment_count(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn fail(&self) {
        self.progress.set_state(DownloadState::Failed);
    }
}

/// How a job ended successfully
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadOutcome {
    /// Output existed before the call; nothing was fetched
    AlreadyPresent,
    /// Output was produced by this call
    Downloaded,
}

/// Summary returned by the entry points
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadReport {
    pub output_path: PathBuf,
    pub outcome: DownloadOutcome,
    /// Bytes credited to the job's progress (0 for `AlreadyPresent`)
    pub bytes: u64,
    /// Segment count (0 for direct files)
    pub segments: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DownloadReport {
    /// Report for an output that was already on disk
    pub fn already_present(output_path: &Path) -> Self {
        let now = Utc::now();
        Self {
            output_path: output_path.to_path_buf(),
            outcome: DownloadOutcome::AlreadyPresent,
            bytes: 0,
            segments: 0,
            started_at: now,
            finished_at: now,
        }
    }
}
