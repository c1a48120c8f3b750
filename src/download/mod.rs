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


//! Download engine
//!
//! Resumable, bounded-concurrency acquisition of segmented streams and single
//! files.
//!
//! # Layers
//! - `client` - HTTP primitives; every network call except probes holds a permit
//! - `playlist` - master and sub-manifest resolution
//! - `segment` - resume-or-fallback for one transfer target
//! - `orchestrator` - fan-out over a segment list, then assembly
//! - `assembler` - ordered concat and remux
//! - `direct` - one file through a `.tmp` path and a rename

pub mod assembler;
pub mod client;
pub mod direct;
pub mod job;
pub mod orchestrator;
pub mod permits;
pub mod playlist;
pub mod progress;
pub mod resume;
pub mod retry;
pub mod segment;

// Re-export commonly used types
pub use assembler::Assembler;
pub use client::{FetchClient, ProbeInfo};
pub use direct::DirectFileDownloader;
pub use job::{DownloadJob, DownloadOutcome, DownloadReport};
pub use orchestrator::SegmentedDownloader;
pub use permits::PermitPool;
pub use playlist::{PlaylistResolver, StreamVariant, VariantPolicy};
pub use progress::{DownloadProgress, DownloadState, ProgressCallback, ProgressTracker};
pub use resume::ResumeCursor;
pub use retry::RetryPolicy;
pub use segment::{Segment, TransferManager, TransferOutcome, TransferTarget};
