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


//! Two-level manifest resolution
//!
//! A master manifest lists variant sub-manifests; a sub-manifest lists
//! segments. Both are read the same way: every line that is not blank and
//! does not start with `#` is a reference, resolved against the directory of
//! the manifest URL.
//!
//! # Variant selection
//! The default policy picks the last-listed variant, on the assumption that
//! publishers order variants by ascending quality. This is a heuristic, not a
//! guarantee. `HighestBandwidth` uses declared `BANDWIDTH=` attributes when
//! every variant carries one.

use crate::download::client::FetchClient;
use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Lines starting with this marker are comments or directives
pub const COMMENT_MARKER: char = '#';

const STREAM_INF: &str = "#EXT-X-STREAM-INF:";

/// One entry of a master manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamVariant {
    /// Position in the manifest (0-based)
    pub rank: usize,
    /// Absolute sub-manifest URL
    pub url: String,
    /// Declared `BANDWIDTH`, if the preceding directive had one
    pub bandwidth: Option<u64>,
}

/// How to choose among stream variants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariantPolicy {
    /// Last entry in source order
    #[default]
    LastListed,
    /// Largest declared bandwidth, falling back to last-listed
    HighestBandwidth,
}

impl VariantPolicy {
    pub fn select<'a>(&self, variants: &'a [StreamVariant]) -> Option<&'a StreamVariant> {
        match self {
            VariantPolicy::LastListed => variants.last(),
            VariantPolicy::HighestBandwidth => {
                if variants.iter().all(|v| v.bandwidth.is_some()) {
                    // max_by_key keeps the last maximum, so ties go to the later entry
                    variants.iter().max_by_key(|v| v.bandwidth)
                } else {
                    variants.last()
                }
            }
        }
    }
}

/// Resolve a manifest reference to an absolute URL
///
/// Absolute references pass through. Relative ones are joined onto the text
/// before the last `/` of the manifest URL (query string excluded); a
/// root-relative reference is joined onto the manifest's origin.
pub fn resolve_reference(manifest_url: &str, reference: &str) -> Result<String> {
    if Url::parse(reference).is_ok() {
        return Ok(reference.to_string());
    }

    if reference.starts_with('/') {
        let base = Url::parse(manifest_url)?;
        return Ok(base.join(reference)?.to_string());
    }

    let without_query = manifest_url
        .split_once('?')
        .map_or(manifest_url, |(path, _)| path);
    let prefix = without_query
        .rfind('/')
        .map(|idx| &without_query[..idx])
        .ok_or_else(|| ArchiveError::InvalidUrl(manifest_url.to_string()))?;

    Ok(format!("{}/{}", prefix, reference))
}

/// Every non-comment line of `body`, resolved against `manifest_url`
pub fn resolve_entries(manifest_url: &str, body: &str) -> Result<Vec<String>> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_MARKER))
        .map(|line| resolve_reference(manifest_url, line))
        .collect()
}

/// Variants of a master manifest with any declared bandwidths
pub fn parse_variants(manifest_url: &str, body: &str) -> Result<Vec<StreamVariant>> {
    let mut variants = Vec::new();
    let mut pending_bandwidth = None;

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(attributes) = line.strip_prefix(STREAM_INF) {
            pending_bandwidth = parse_bandwidth(attributes);
            continue;
        }
        if line.starts_with(COMMENT_MARKER) {
            continue;
        }
        variants.push(StreamVariant {
            rank: variants.len(),
            url: resolve_reference(manifest_url, line)?,
            bandwidth: pending_bandwidth.take(),
        });
    }

    Ok(variants)
}

fn parse_bandwidth(attributes: &str) -> Option<u64> {
    attributes
        .split(',')
        .filter_map(|attr| attr.split_once('='))
        .find(|(key, _)| key.trim() == "BANDWIDTH")
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Fetches manifests and resolves their entries
#[derive(Debug, Clone)]
pub struct PlaylistResolver {
    client: FetchClient,
    policy: VariantPolicy,
}

impl PlaylistResolver {
    pub fn new(client: FetchClient) -> Self {
        Self {
            client,
            policy: VariantPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: VariantPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Absolute URLs listed by the manifest at `manifest_url`, in source order
    pub async fn resolve_variants(&self, manifest_url: &str) -> Result<Vec<String>> {
        let body = self.client.fetch_text(manifest_url).await?;
        resolve_entries(manifest_url, &body)
    }

    /// Pick the variant sub-manifest to download from a master manifest
    pub async fn best_variant(&self, master_url: &str) -> Result<StreamVariant> {
        let body = self.client.fetch_text(master_url).await?;
        let variants = parse_variants(master_url, &body)?;
        let chosen = self
            .policy
            .select(&variants)
            .cloned()
            .ok_or_else(|| ArchiveError::EmptyPlaylist(master_url.to_string()))?;

        debug!(
            master = master_url,
            variants = variants.len(),
            chosen = %chosen.url,
            "selected stream variant"
        );
        Ok(chosen)
    }

    /// Segment URLs of the chosen variant, in playback order
    pub async fn resolve_segments(&self, master_url: &str) -> Result<Vec<String>> {
        let variant = self.best_variant(master_url).await?;
        let segments = self.resolve_variants(&variant.url).await?;
        if segments.is_empty() {
            return Err(ArchiveError::EmptyPlaylist(variant.url));
        }
        Ok(segments)
    }
}
