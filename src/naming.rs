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


//! Output file naming
//!
//! # Template System
//! - Placeholders: `{prefix}`, `{programme}`, `{episode}`
//! - Unknown placeholders render as nothing
//! - Characters that are unsafe in filenames become `_`
//!
//! Segmented streams are remuxed to MP4; direct files keep the extension of
//! their URL path.

use crate::error::{ArchiveError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_TEMPLATE: &str = "{prefix}_{programme}_{episode}";
pub const DEFAULT_PREFIX: &str = "episode";
pub const SEGMENTED_EXTENSION: &str = "mp4";

const MAX_COMPONENT_LENGTH: usize = 255;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{[a-z_]+\}").expect("valid placeholder pattern");
    static ref REPEATED_UNDERSCORE: Regex = Regex::new(r"_{2,}").expect("valid underscore pattern");
}

/// Filename template for archived episodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputNaming {
    pub template: String,
    pub prefix: String,
}

impl Default for OutputNaming {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl OutputNaming {
    pub fn new(template: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            prefix: prefix.into(),
        }
    }

    /// File stem for one episode, without extension
    pub fn render(&self, programme_id: &str, episode_id: &str) -> String {
        let rendered = self
            .template
            .replace("{prefix}", &self.prefix)
            .replace("{programme}", programme_id)
            .replace("{episode}", episode_id);
        let rendered = PLACEHOLDER.replace_all(&rendered, "");
        let sanitized = sanitize_filename(&rendered);
        let collapsed = REPEATED_UNDERSCORE.replace_all(&sanitized, "_");
        collapsed.trim_matches('_').to_string()
    }

    /// Full output path under `directory`
    pub fn output_path(
        &self,
        directory: &Path,
        programme_id: &str,
        episode_id: &str,
        extension: &str,
    ) -> Result<PathBuf> {
        let stem = self.render(programme_id, episode_id);
        if stem.is_empty() {
            return Err(ArchiveError::InvalidPath(format!(
                "template {:?} rendered an empty filename",
                self.template
            )));
        }

        let ext = extension.trim_start_matches('.');
        let budget = MAX_COMPONENT_LENGTH.saturating_sub(ext.len() + 1);
        let stem = truncate_component(&stem, budget);

        Ok(directory.join(format!("{}.{}", stem, ext)))
    }
}

/// Replace characters that are invalid in filenames on common platforms
pub fn sanitize_filename(name: &str) -> String {
    let invalid_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
    name.chars()
        .map(|c| if invalid_chars.contains(&c) || c.is_control() { '_' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Truncate to at most `max_bytes` without splitting a UTF-8 character
fn truncate_component(name: &str, max_bytes: usize) -> &str {
    if name.len() <= max_bytes {
        return name;
    }
    let mut end = max_bytes;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Extension of the last path segment of `url`, lowercased
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.last()?.to_string();
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
