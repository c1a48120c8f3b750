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


//! Single-file downloads (progressive MP4 and similar)

use crate::download::client::FetchClient;
use crate::download::job::{DownloadJob, DownloadReport, JobSource};
use crate::download::progress::{DownloadState, ProgressCallback};
use crate::download::segment::{append_suffix, TransferManager, TransferTarget};
use crate::error::{ArchiveError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// `<output>.tmp`, where the file lives until it is complete
pub fn direct_temp_path(output: &Path) -> PathBuf {
    append_suffix(output, ".tmp")
}

#[derive(Debug, Clone)]
pub struct DirectFileDownloader {
    client: FetchClient,
    transfers: TransferManager,
}

impl DirectFileDownloader {
    pub fn new(client: FetchClient) -> Self {
        Self {
            transfers: TransferManager::new(client.clone()),
            client,
        }
    }

    pub async fn download_direct_file(&self, url: &str, output: &Path) -> Result<DownloadReport> {
        self.download_direct_file_with_progress(url, output, None).await
    }

    /// Fetch `url` into a temp file and rename it to `output` once complete
    pub async fn download_direct_file_with_progress(
        &self,
        url: &str,
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

        let target = TransferTarget::new(url, direct_temp_path(output));
        let job = DownloadJob::new(output, JobSource::Single(target.clone()), callback);

        job.progress.set_state(DownloadState::Probing);
        match self.client.probe_size(url).await {
            Ok(size) => job.progress.set_total(size.unwrap_or(0)),
            Err(e) => debug!(url, error = %e, "size probe failed"),
        }

        info!(url, output = %output.display(), "starting direct download");
        job.progress.set_state(DownloadState::Downloading);

        let result = async {
            let outcome = self.transfers.transfer(&target, Some(job.progress.clone())).await?;
            tokio::fs::rename(&target.destination, output).await?;
            Ok::<_, ArchiveError>(outcome)
        }
        .await;

        match result {
            Ok(outcome) => {
                debug!(?outcome, "direct transfer complete");
                Ok(job.finish())
            }
            Err(e) => {
                error!(url, output = %output.display(), error = %e, "direct download failed");
                job.fail();
                Err(e)
            }
        }
    }
}
