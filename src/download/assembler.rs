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


//! Segment assembly
//!
//! Two phases:
//! 1. Concatenate segment files in ascending index order into a scratch
//!    container (`<output>.concat.ts`).
//! 2. Remux the scratch container into a staging file beside the output
//!    (`<stem>.remux.<ext>`) and rename it onto the output once the remux
//!    succeeds.
//!
//! The output path only ever holds a finished remux, so an interrupted run
//! cannot leave a file that a later run mistakes for a complete archive.
//! Scratch and staging files are removed on every path that returns. On
//! failure segment files stay on disk; on success they are deleted.

use crate::download::segment::{append_suffix, Segment};
use crate::error::{ArchiveError, Result};
use crate::remux::Remuxer;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// Scratch container for the concatenated segments of `output`
pub fn scratch_path(output: &Path) -> PathBuf {
    append_suffix(output, ".concat.ts")
}

/// Remux target for `output`; keeps the extension so the muxer picks the
/// same container
pub fn staging_path(output: &Path) -> PathBuf {
    let stem = output.file_stem().unwrap_or_default();
    let mut name = stem.to_os_string();
    name.push(".remux");
    if let Some(ext) = output.extension() {
        name.push(".");
        name.push(ext);
    }
    output.with_file_name(name)
}

/// Concatenates segments and hands the result to a [`Remuxer`]
#[derive(Clone)]
pub struct Assembler {
    remuxer: Arc<dyn Remuxer>,
}

impl std::fmt::Debug for Assembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assembler").finish_non_exhaustive()
    }
}

impl Assembler {
    pub fn new(remuxer: Arc<dyn Remuxer>) -> Self {
        Self { remuxer }
    }

    /// Produce `output` from `segments`, whatever order they are given in
    pub async fn assemble(&self, segments: &[Segment], output: &Path) -> Result<()> {
        let mut ordered: Vec<&Segment> = segments.iter().collect();
        ordered.sort_by_key(|segment| segment.index);

        let scratch = scratch_path(output);
        let staging = staging_path(output);
        let result = self.concat_and_remux(&ordered, &scratch, &staging, output).await;
        remove_if_present(&scratch).await;
        remove_if_present(&staging).await;

        match result {
            Ok(()) => {
                for segment in &ordered {
                    remove_if_present(&segment.temp_path).await;
                }
                info!(output = %output.display(), segments = ordered.len(), "assembled output");
                Ok(())
            }
            Err(e) => Err(ArchiveError::assembly_failed(output, e.to_string())),
        }
    }

    async fn concat_and_remux(
        &self,
        ordered: &[&Segment],
        scratch: &Path,
        staging: &Path,
        output: &Path,
    ) -> Result<()> {
        concatenate(ordered, scratch).await?;
        self.remuxer.remux(scratch, staging).await?;
        tokio::fs::rename(staging, output).await?;
        Ok(())
    }
}

/// Append every segment's bytes to `scratch` in the given order
async fn concatenate(ordered: &[&Segment], scratch: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(scratch).await?);
    for segment in ordered {
        let mut reader = File::open(&segment.temp_path).await.map_err(|e| {
            ArchiveError::FileNotFound(format!("segment {}: {}: {}", segment.index, segment.temp_path.display(), e))
        })?;
        let copied = tokio::io::copy(&mut reader, &mut writer).await?;
        debug!(index = segment.index, bytes = copied, "concatenated segment");
    }
    writer.flush().await?;
    Ok(())
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
