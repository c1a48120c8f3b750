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


//! Segmented stream downloads
//!
//! # Flow
//! 1. Output already on disk: done, no network traffic.
//! 2. Master manifest -> chosen variant -> segment list.
//! 3. HEAD every segment concurrently (outside the permit pool) to size the
//!    progress total.
//! 4. One transfer per segment, all in flight at once; the permit pool caps
//!    how many actually hit the network.
//! 5. Assemble in index order.
//!
//! A failed segment fails the job. Finished segment files stay on disk, so a
//! rerun only fetches what is missing.

use crate::download::assembler::Assembler;
use crate::download::client::FetchClient;
use crate::download::job::{DownloadJob, DownloadReport, JobSource};
use crate::download::playlist::{PlaylistResolver, VariantPolicy};
use crate::download::progress::{DownloadState, ProgressCallback, ProgressTracker};
use crate::download::segment::{Segment, TransferManager};
use crate::error::{ArchiveError, Result};
use futures_util::future::join_all;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Produces one output file from a master manifest
#[derive(Debug, Clone)]
pub struct SegmentedDownloader {
    client: FetchClient,
    resolver: PlaylistResolver,
    transfers: TransferManager,
    assembler: Assembler,
}

impl SegmentedDownloader {
    pub fn new(client: FetchClient, assembler: Assembler) -> Self {
        Self {
            resolver: PlaylistResolver::new(client.clone()),
            transfers: TransferManager::new(client.clone()),
            client,
            assembler,
        }
    }

    pub fn with_variant_policy(mut self, policy: VariantPolicy) -> Self {
        self.resolver = self.resolver.with_policy(policy);
        self
    }

    pub async fn download_segmented_stream(&self, manifest_url: &str, output: &Path) -> Result<DownloadReport> {
        self.download_segmented_stream_with_progress(manifest_url, output, None)
            .await
    }

    pub async fn download_segmented_stream_with_progress(
        &self,
        manifest_url: &str,
        output: &Path,
        callback: Option<ProgressCallback>,
    ) -> Result<DownloadReport> {
        if tokio::fs::try_exists(output).await? {
            info!(output = %output.display(), "output already present, skipping");
            return Ok(DownloadReport::already_present(output));
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let segment_urls = self.resolver.resolve_segments(manifest_url).await?;
        let segments: Vec<Segment> = segment_urls
            .into_iter()
            .enumerate()
            .map(|(index, url)| Segment::for_output(output, index, url))
            .collect();

        info!(
            manifest = manifest_url,
            output = %output.display(),
            segments = segments.len(),
            "starting segmented download"
        );

        let job = DownloadJob::new(output, JobSource::Segments(segments.clone()), callback);
        job.progress.set_state(DownloadState::Probing);
        job.progress.set_total(self.total_size(&segments).await);

        job.progress.set_state(DownloadState::Downloading);
        if let Err(e) = self.transfer_all(&segments, &job.progress).await {
            error!(output = %output.display(), error = %e, "segmented download failed");
            job.fail();
            return Err(e);
        }

        job.progress.set_state(DownloadState::Assembling);
        if let Err(e) = self.assembler.assemble(&segments, output).await {
            error!(output = %output.display(), error = %e, "assembly failed");
            job.fail();
            return Err(e);
        }

        Ok(job.finish())
    }

    /// Sum of the segment sizes the origin reports; unknown sizes count as 0
    async fn total_size(&self, segments: &[Segment]) -> u64 {
        let probes = segments.iter().map(|segment| self.client.probe_size(&segment.url));
        join_all(probes)
            .await
            .into_iter()
            .zip(segments)
            .map(|(result, segment)| match result {
                Ok(size) => size.unwrap_or(0),
                Err(e) => {
                    debug!(index = segment.index, error = %e, "segment probe failed");
                    0
                }
            })
            .sum()
    }

    async fn transfer_all(&self, segments: &[Segment], tracker: &Arc<ProgressTracker>) -> Result<()> {
        let transfers = segments.iter().map(|segment| {
            let target = segment.target();
            let tracker = Some(Arc::clone(tracker));
            async move { self.transfers.transfer(&target, tracker).await }
        });

        let results = join_all(transfers).await;

        // results come back in segment order, so the first error is the lowest index
        for (segment, result) in segments.iter().zip(results) {
            match result {
                Ok(outcome) => debug!(index = segment.index, ?outcome, "segment complete"),
                Err(e) => {
                    return Err(ArchiveError::SegmentFailed {
                        index: segment.index,
                        url: segment.url.clone(),
                        source: Box::new(e),
                    })
                }
            }
        }
        Ok(())
    }
}
