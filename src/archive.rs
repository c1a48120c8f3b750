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


//! Episode archiving
//!
//! An episode may be published as a segmented stream, a single file, or
//! both. The stream is tried first; if it fails for any reason and a file URL
//! is known, the file is downloaded instead.
//!
//! # Batches
//! Segmented episodes run one after another (each already fans out across the
//! permit pool). Episodes that need the direct file then run concurrently.
//! Every episode gets its own result; one failure does not stop the batch.

use crate::config::EngineConfig;
use crate::download::assembler::Assembler;
use crate::download::client::FetchClient;
use crate::download::direct::DirectFileDownloader;
use crate::download::job::DownloadReport;
use crate::download::orchestrator::SegmentedDownloader;
use crate::download::permits::PermitPool;
use crate::download::playlist::VariantPolicy;
use crate::error::{ArchiveError, Result};
use crate::naming::{extension_from_url, OutputNaming, SEGMENTED_EXTENSION};
use crate::remux::{FfmpegRemuxer, Remuxer};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Where one episode can be fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeSource {
    pub programme_id: String,
    pub episode_id: String,
    /// Master manifest of the segmented stream
    pub manifest_url: Option<String>,
    /// Single progressive file
    pub file_url: Option<String>,
}

impl EpisodeSource {
    pub fn new(programme_id: impl Into<String>, episode_id: impl Into<String>) -> Self {
        Self {
            programme_id: programme_id.into(),
            episode_id: episode_id.into(),
            manifest_url: None,
            file_url: None,
        }
    }

    pub fn with_manifest(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = Some(url.into());
        self
    }

    pub fn with_file(mut self, url: impl Into<String>) -> Self {
        self.file_url = Some(url.into());
        self
    }
}

/// Which source produced an archived episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Segmented,
    Direct,
}

#[derive(Debug, Clone)]
pub struct ArchivedEpisode {
    pub kind: SourceKind,
    pub report: DownloadReport,
}

/// Outcome of one episode in a batch
#[derive(Debug)]
pub struct EpisodeResult {
    pub source: EpisodeSource,
    pub result: Result<ArchivedEpisode>,
}

impl EpisodeResult {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Archives episodes into one directory
#[derive(Debug, Clone)]
pub struct Archiver {
    output_dir: PathBuf,
    naming: OutputNaming,
    segmented: SegmentedDownloader,
    direct: DirectFileDownloader,
    prefer_direct: bool,
}

impl Archiver {
    /// Archiver with its own permit pool and the ffmpeg remuxer
    pub fn new(config: &EngineConfig, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let permits = PermitPool::new(config.max_concurrent_requests);
        let client = FetchClient::new(config, permits)?;
        Ok(Self::with_parts(
            client,
            Arc::new(FfmpegRemuxer::from_config(config)),
            output_dir,
        ))
    }

    /// Archiver over an existing client (and its permit pool)
    pub fn with_parts(client: FetchClient, remuxer: Arc<dyn Remuxer>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            naming: OutputNaming::default(),
            segmented: SegmentedDownloader::new(client.clone(), Assembler::new(remuxer)),
            direct: DirectFileDownloader::new(client),
            prefer_direct: false,
        }
    }

    pub fn with_naming(mut self, naming: OutputNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_variant_policy(mut self, policy: VariantPolicy) -> Self {
        self.segmented = self.segmented.with_variant_policy(policy);
        self
    }

    /// Skip segmented streams and go straight to the file URL
    pub fn prefer_direct(mut self, prefer_direct: bool) -> Self {
        self.prefer_direct = prefer_direct;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Output path for the segmented stream of `source`
    pub fn segmented_output(&self, source: &EpisodeSource) -> Result<PathBuf> {
        self.naming.output_path(
            &self.output_dir,
            &source.programme_id,
            &source.episode_id,
            SEGMENTED_EXTENSION,
        )
    }

    /// Output path for the direct file of `source`
    pub fn direct_output(&self, source: &EpisodeSource, file_url: &str) -> Result<PathBuf> {
        let extension = extension_from_url(file_url).unwrap_or_else(|| SEGMENTED_EXTENSION.to_string());
        self.naming.output_path(
            &self.output_dir,
            &source.programme_id,
            &source.episode_id,
            &extension,
        )
    }

    /// Archive one episode, stream first, file as fallback
    pub async fn archive_episode(&self, source: &EpisodeSource) -> Result<ArchivedEpisode> {
        match self.try_segmented(source).await {
            Some(Ok(archived)) => Ok(archived),
            Some(Err(e)) => match source.file_url {
                Some(_) => {
                    warn!(
                        programme = %source.programme_id,
                        episode = %source.episode_id,
                        error = %e,
                        "segmented download failed, falling back to direct file"
                    );
                    self.archive_direct(source).await
                }
                None => Err(e),
            },
            None => self.archive_direct(source).await,
        }
    }

    /// Archive many episodes, reporting each separately
    pub async fn archive_batch(&self, sources: &[EpisodeSource]) -> Vec<EpisodeResult> {
        let mut results: Vec<Option<EpisodeResult>> = (0..sources.len()).map(|_| None).collect();
        let mut direct_queue = Vec::new();

        for (position, source) in sources.iter().enumerate() {
            match self.try_segmented(source).await {
                Some(Ok(archived)) => {
                    results[position] = Some(EpisodeResult {
                        source: source.clone(),
                        result: Ok(archived),
                    });
                }
                Some(Err(e)) if source.file_url.is_none() => {
                    results[position] = Some(EpisodeResult {
                        source: source.clone(),
                        result: Err(e),
                    });
                }
                Some(Err(e)) => {
                    warn!(
                        programme = %source.programme_id,
                        episode = %source.episode_id,
                        error = %e,
                        "segmented download failed, queued for direct file"
                    );
                    direct_queue.push(position);
                }
                None => direct_queue.push(position),
            }
        }

        info!(direct = direct_queue.len(), "downloading direct files");
        let direct_results = join_all(
            direct_queue
                .iter()
                .map(|&position| self.archive_direct(&sources[position])),
        )
        .await;

        for (position, result) in direct_queue.into_iter().zip(direct_results) {
            results[position] = Some(EpisodeResult {
                source: sources[position].clone(),
                result,
            });
        }

        results.into_iter().flatten().collect()
    }

    /// `None` when the segmented stream should not be attempted
    async fn try_segmented(&self, source: &EpisodeSource) -> Option<Result<ArchivedEpisode>> {
        if self.prefer_direct && source.file_url.is_some() {
            return None;
        }
        let manifest_url = source.manifest_url.as_deref()?;

        let result = async {
            let output = self.segmented_output(source)?;
            let report = self.segmented.download_segmented_stream(manifest_url, &output).await?;
            Ok::<_, ArchiveError>(ArchivedEpisode {
                kind: SourceKind::Segmented,
                report,
            })
        }
        .await;
        Some(result)
    }

    async fn archive_direct(&self, source: &EpisodeSource) -> Result<ArchivedEpisode> {
        let file_url = source.file_url.as_deref().ok_or_else(|| {
            ArchiveError::InvalidInput(format!(
                "episode {}/{} has neither a usable stream nor a file URL",
                source.programme_id, source.episode_id
            ))
        })?;

        let output = self.direct_output(source, file_url)?;
        let report = self.direct.download_direct_file(file_url, &output).await?;
        Ok(ArchivedEpisode {
            kind: SourceKind::Direct,
            report,
        })
    }
}
