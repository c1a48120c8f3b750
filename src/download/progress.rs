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


//! Download progress tracking and reporting
//!
//! # Progress Information
//! - Label identifying the job (usually the output file name)
//! - Units completed / units total (bytes)
//! - Current speed with moving average
//! - Estimated time remaining
//! - Job state (Probing, Downloading, Assembling, ...)
//!
//! The engine works with no sink attached: every reporting path is a no-op
//! when the tracker was built without a callback.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Lifecycle of a download job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadState {
    /// Sizing the job (manifest resolution, HEAD probes)
    Probing,
    /// Transfers in flight
    Downloading,
    /// Concatenating and remuxing segments
    Assembling,
    /// Output file is in place
    Completed,
    /// Job ended with an error
    Failed,
}

/// Progress snapshot for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// Job label for display
    pub label: String,

    /// Bytes confirmed so far
    pub units_completed: u64,

    /// Bytes expected in total (0 if unknown)
    pub units_total: u64,

    /// Percentage complete (0.0 - 100.0)
    pub percent_complete: f64,

    /// Current download speed in bytes per second
    pub download_speed: f64,

    /// Estimated time remaining in seconds (0 if unknown)
    pub eta_seconds: u64,

    pub state: DownloadState,
}

impl DownloadProgress {
    pub fn new(label: String, units_total: u64) -> Self {
        Self {
            label,
            units_completed: 0,
            units_total,
            percent_complete: 0.0,
            download_speed: 0.0,
            eta_seconds: 0,
            state: DownloadState::Probing,
        }
    }

    /// Calculate percentage from units
    pub fn calculate_percentage(&mut self) {
        if self.units_total > 0 {
            let ratio = self.units_completed as f64 / self.units_total as f64;
            self.percent_complete = (ratio * 100.0).min(100.0);
        } else {
            self.percent_complete = 0.0;
        }
    }

    /// Calculate ETA from speed and remaining units
    pub fn calculate_eta(&mut self) {
        if self.download_speed > 0.0 && self.units_total > 0 {
            let remaining = self.units_total.saturating_sub(self.units_completed);
            self.eta_seconds = (remaining as f64 / self.download_speed) as u64;
        } else {
            self.eta_seconds = 0;
        }
    }

    /// Format download speed as human-readable string (e.g., "2.5 MB/s")
    pub fn speed_string(&self) -> String {
        format!("{:.1} MB/s", self.download_speed / 1_000_000.0)
    }

    /// Format ETA as human-readable string (e.g., "5m 30s")
    pub fn eta_string(&self) -> String {
        if self.eta_seconds == 0 {
            return "calculating...".to_string();
        }

        let hours = self.eta_seconds / 3600;
        let minutes = (self.eta_seconds % 3600) / 60;
        let seconds = self.eta_seconds % 60;

        if hours > 0 {
            format!("{}h {}m", hours, minutes)
        } else if minutes > 0 {
            format!("{}m {}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    }

    /// Format bytes as human-readable string (e.g., "45.2 MB")
    pub fn bytes_string(bytes: u64) -> String {
        format!("{:.1} MB", bytes as f64 / 1_000_000.0)
    }

    pub fn display_string(&self) -> String {
        match self.state {
            DownloadState::Probing => format!("{}: Probing", self.label),
            DownloadState::Downloading => format!(
                "{}: {:.1}% ({} / {}) - {} - {}",
                self.label,
                self.percent_complete,
                Self::bytes_string(self.units_completed),
                Self::bytes_string(self.units_total),
                self.speed_string(),
                self.eta_string()
            ),
            DownloadState::Assembling => format!("{}: Assembling", self.label),
            DownloadState::Completed => format!("{}: Completed", self.label),
            DownloadState::Failed => format!("{}: Failed", self.label),
        }
    }
}

/// Callback type for progress updates
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// Speed tracker with moving average
///
/// Sliding window over position samples to smooth out network fluctuations.
#[derive(Debug)]
pub struct SpeedTracker {
    samples: VecDeque<SpeedSample>,
    window_duration: Duration,
}

#[derive(Debug, Clone)]
struct SpeedSample {
    timestamp: Instant,
    position: u64,
}

impl SpeedTracker {
    /// Create new speed tracker with default 10-second window
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(10))
    }

    pub fn with_window(window_duration: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            window_duration,
        }
    }

    /// Add a position sample (total units so far)
    pub fn add_position(&mut self, position: u64) {
        let now = Instant::now();
        self.samples.push_back(SpeedSample {
            timestamp: now,
            position,
        });

        while let Some(sample) = self.samples.front() {
            if now.duration_since(sample.timestamp) > self.window_duration {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Current average speed in units per second
    pub fn average_speed(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }

        let delta = last.position.saturating_sub(first.position);
        let elapsed = last.timestamp.duration_since(first.timestamp).as_secs_f64();

        if elapsed > 0.0 {
            delta as f64 / elapsed
        } else {
            0.0
        }
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate progress for one job, shared by all of its transfers
///
/// Counters are atomic so concurrent segment tasks can report without
/// contending; callback delivery is throttled to `update_interval`.
pub struct ProgressTracker {
    label: String,
    completed: AtomicU64,
    total: AtomicU64,
    inner: Mutex<TrackerInner>,
    update_interval: Duration,
    callback: Option<ProgressCallback>,
}

struct TrackerInner {
    speed_tracker: SpeedTracker,
    last_update: Option<Instant>,
    state: DownloadState,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("label", &self.label)
            .field("completed", &self.completed())
            .field("total", &self.total())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new(label: impl Into<String>, callback: Option<ProgressCallback>) -> Self {
        Self {
            label: label.into(),
            completed: AtomicU64::new(0),
            total: AtomicU64::new(0),
            inner: Mutex::new(TrackerInner {
                speed_tracker: SpeedTracker::new(),
                last_update: None,
                state: DownloadState::Probing,
            }),
            update_interval: Duration::from_millis(200),
            callback,
        }
    }

    /// Tracker that reports to nobody
    pub fn silent(label: impl Into<String>) -> Self {
        Self::new(label, None)
    }

    /// Override the minimum interval between callbacks
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Credit `units` newly confirmed bytes
    pub fn advance(&self, units: u64) {
        if units == 0 {
            return;
        }
        let completed = self.completed.fetch_add(units, Ordering::SeqCst) + units;

        let due = {
            let mut inner = self.lock_inner();
            inner.speed_tracker.add_position(completed);
            let now = Instant::now();
            let due = inner
                .last_update
                .map_or(true, |last| now.duration_since(last) >= self.update_interval);
            if due {
                inner.last_update = Some(now);
            }
            due
        };

        if due {
            self.emit();
        }
    }

    /// Change the job state; always delivered to the callback
    pub fn set_state(&self, state: DownloadState) {
        self.lock_inner().state = state;
        self.emit();
    }

    /// Current snapshot
    pub fn snapshot(&self) -> DownloadProgress {
        let inner = self.lock_inner();
        let mut progress = DownloadProgress::new(self.label.clone(), self.total());
        progress.units_completed = self.completed();
        progress.download_speed = inner.speed_tracker.average_speed();
        progress.state = inner.state;
        progress.calculate_percentage();
        progress.calculate_eta();
        progress
    }

    fn emit(&self) {
        if let Some(ref callback) = self.callback {
            callback(self.snapshot());
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Per-transfer reporter crediting each byte position at most once
///
/// Bytes found on disk from an earlier run are credited on the first
/// observation; retries that re-send bytes (a non-resumable restart from zero)
/// are not counted again.
#[derive(Debug, Default)]
pub struct TransferReporter {
    tracker: Option<Arc<ProgressTracker>>,
    reported: u64,
}

impl TransferReporter {
    pub fn new(tracker: Option<Arc<ProgressTracker>>) -> Self {
        Self { tracker, reported: 0 }
    }

    /// Report that the transfer has confirmed bytes up to `position`
    pub fn report_position(&mut self, position: u64) {
        if position <= self.reported {
            return;
        }
        let delta = position - self.reported;
        self.reported = position;
        if let Some(ref tracker) = self.tracker {
            tracker.advance(delta);
        }
    }

    /// Highest position reported so far
    pub fn reported(&self) -> u64 {
        self.reported
    }
}
