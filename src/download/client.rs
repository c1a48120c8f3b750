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


//! HTTP fetch primitives with resume support
//!
//! # Operations
//! - `fetch_body` - whole-body GET, one permit, no retry
//! - `probe` / `probe_size` - HEAD for size and range capability, bounded
//!   retry on timeouts only, never takes a permit
//! - `resumable_fetch` - probe, ranged GET, streamed append; retried on
//!   transient failures from the current on-disk size
//! - `fetch_bytes_non_resumable` - whole stream into a scratch buffer,
//!   retried from byte 0 on transient failures
//!
//! Only `resumable_fetch` mutates durable state (its destination file).

use crate::config::EngineConfig;
use crate::download::permits::PermitPool;
use crate::download::progress::TransferReporter;
use crate::download::resume::{ContentRange, ResumeCursor};
use crate::download::retry::RetryPolicy;
use crate::error::{ArchiveError, Result};
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// What a metadata probe learned about a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeInfo {
    /// `Content-Length`, if the origin sent one
    pub content_length: Option<u64>,
    /// Whether the origin advertised byte-range support
    pub accepts_ranges: bool,
}

impl ProbeInfo {
    /// Total size when the origin can resume, otherwise why it cannot
    pub fn resumable_length(&self) -> std::result::Result<u64, &'static str> {
        match (self.accepts_ranges, self.content_length) {
            (true, Some(length)) => Ok(length),
            (false, _) => Err("no Accept-Ranges header"),
            (true, None) => Err("no Content-Length header"),
        }
    }
}

/// HTTP client bound to a permit pool
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    permits: PermitPool,
    retry: RetryPolicy,
    probe_timeout: Duration,
    probe_retries: u32,
    chunk_size: usize,
}

impl FetchClient {
    /// Create a client drawing permits from `permits`
    pub fn new(config: &EngineConfig, permits: PermitPool) -> Result<Self> {
        config.validate()?;

        // No overall timeout: streamed bodies may legitimately take hours.
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self::with_client(client, config, permits))
    }

    /// Wrap an existing reqwest client
    pub fn with_client(client: Client, config: &EngineConfig, permits: PermitPool) -> Self {
        Self {
            client,
            permits,
            retry: config.retry_policy(),
            probe_timeout: config.probe_timeout,
            probe_retries: config.probe_retries,
            chunk_size: config.chunk_size,
        }
    }

    /// Replace the transfer retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn permits(&self) -> &PermitPool {
        &self.permits
    }

    /// GET the whole body under one permit
    pub async fn fetch_body(&self, url: &str) -> Result<Bytes> {
        let _permit = self.permits.acquire().await?;
        let response = self.client.get(url).send().await?;
        let response = Self::check_status(response, url)?;
        Ok(response.bytes().await?)
    }

    /// GET the whole body as UTF-8 text
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let body = self.fetch_body(url).await?;
        Ok(String::from_utf8(body.to_vec())?)
    }

    /// HEAD the resource for its length and range capability
    ///
    /// Timeouts are retried up to `probe_retries` extra times; status errors are
    /// returned immediately. An origin that refuses HEAD is reported as having
    /// neither length nor range support.
    pub async fn probe(&self, url: &str) -> Result<ProbeInfo> {
        let attempts = self.probe_retries + 1;
        for attempt in 1..=attempts {
            let result = self
                .client
                .head(url)
                .timeout(self.probe_timeout)
                .send()
                .await;

            let response = match result {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    debug!(url, attempt, "probe timed out");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
                return Ok(ProbeInfo {
                    content_length: None,
                    accepts_ranges: false,
                });
            }
            let response = Self::check_status(response, url)?;
            let headers = response.headers();

            // Read the header directly; HEAD responses carry no body for
            // reqwest to size.
            let content_length = headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());

            let accepts_ranges = headers
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .map(|v| !v.trim().eq_ignore_ascii_case("none"))
                .unwrap_or(false);

            return Ok(ProbeInfo {
                content_length,
                accepts_ranges,
            });
        }

        Err(ArchiveError::ProbeTimedOut {
            url: url.to_string(),
            attempts,
        })
    }

    /// Content length from a probe, `None` if the origin omits it
    pub async fn probe_size(&self, url: &str) -> Result<Option<u64>> {
        Ok(self.probe(url).await?.content_length)
    }

    /// Download `url` into `destination`, continuing from whatever is on disk
    ///
    /// Fails with `NotResumable` when the origin lacks `Accept-Ranges` or
    /// `Content-Length`; that is never retried here. Transient failures restart
    /// the attempt from a fresh probe and the current file size.
    pub async fn resumable_fetch(
        &self,
        url: &str,
        destination: &Path,
        reporter: &mut TransferReporter,
    ) -> Result<()> {
        let mut failures = 0u32;
        loop {
            match self.resumable_attempt(url, destination, reporter).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    failures += 1;
                    self.backoff_or_give_up(url, failures, e).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn resumable_attempt(
        &self,
        url: &str,
        destination: &Path,
        reporter: &mut TransferReporter,
    ) -> Result<()> {
        let _permit = self.permits.acquire().await?;

        let probe = self.probe(url).await?;
        let total = probe
            .resumable_length()
            .map_err(|reason| ArchiveError::not_resumable(url, reason))?;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(destination)
            .await?;
        let on_disk = file.metadata().await?.len();

        let mut cursor = match ResumeCursor::new(on_disk, total) {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(url, path = %destination.display(), error = %e, "discarding oversized partial file");
                file.set_len(0).await?;
                ResumeCursor::new(0, total)?
            }
        };
        reporter.report_position(cursor.written());

        if cursor.is_complete() {
            debug!(url, bytes = total, "already fully downloaded");
            return Ok(());
        }

        let response = self
            .client
            .get(url)
            .header(RANGE, cursor.range_header())
            .send()
            .await?;

        match response.status() {
            StatusCode::RANGE_NOT_SATISFIABLE => {
                if cursor.written() < total {
                    warn!(
                        url,
                        written = cursor.written(),
                        total,
                        "origin reports range not satisfiable; treating as complete"
                    );
                }
                reporter.report_position(total);
                return Ok(());
            }
            StatusCode::PARTIAL_CONTENT => {
                let value = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| ArchiveError::InvalidContentRange("missing header".to_string()))?;
                let range = ContentRange::parse(value)?;
                cursor.rewind_to(range.start)?;
            }
            StatusCode::OK => {
                debug!(url, "origin ignored Range header; restarting from byte 0");
                cursor.rewind_to(0)?;
            }
            status => {
                return Err(ArchiveError::UnexpectedStatusCode {
                    status_code: status.as_u16(),
                    url: url.to_string(),
                });
            }
        }

        file.set_len(cursor.written()).await?;
        file.seek(SeekFrom::Start(cursor.written())).await?;

        let mut writer = BufWriter::with_capacity(self.chunk_size, file);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Keep whatever already reached the buffer; the next attempt
                    // resumes from the on-disk size.
                    if let Err(flush_err) = writer.flush().await {
                        debug!(url, error = %flush_err, "flush after stream error failed");
                    }
                    return Err(e.into());
                }
            };

            cursor.advance(chunk.len() as u64)?;
            writer.write_all(&chunk).await?;
            reporter.report_position(cursor.written());
        }

        writer.flush().await?;
        writer.into_inner().sync_data().await?;

        if !cursor.is_complete() {
            return Err(ArchiveError::network_error(
                format!(
                    "stream for {} ended at {} of {} bytes",
                    url,
                    cursor.written(),
                    cursor.total()
                ),
                true,
            ));
        }

        Ok(())
    }

    /// Download the whole body into memory, restarting from zero on transient failures
    pub async fn fetch_bytes_non_resumable(
        &self,
        url: &str,
        reporter: &mut TransferReporter,
    ) -> Result<Vec<u8>> {
        let mut failures = 0u32;
        loop {
            match self.non_resumable_attempt(url, reporter).await {
                Ok(buffer) => return Ok(buffer),
                Err(e) if e.is_transient() => {
                    failures += 1;
                    self.backoff_or_give_up(url, failures, e).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn non_resumable_attempt(
        &self,
        url: &str,
        reporter: &mut TransferReporter,
    ) -> Result<Vec<u8>> {
        let _permit = self.permits.acquire().await?;

        let response = self.client.get(url).send().await?;
        let response = Self::check_status(response, url)?;
        let expected = response.content_length();

        let mut buffer = Vec::with_capacity(expected.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);
            reporter.report_position(buffer.len() as u64);
        }

        if let Some(expected) = expected {
            if (buffer.len() as u64) < expected {
                return Err(ArchiveError::network_error(
                    format!("body of {} ended at {} of {} bytes", url, buffer.len(), expected),
                    true,
                ));
            }
        }

        Ok(buffer)
    }

    /// Sleep before the next attempt, or fail once the budget is spent
    async fn backoff_or_give_up(&self, url: &str, failures: u32, error: ArchiveError) -> Result<()> {
        if !self.retry.allows_another(failures) {
            return Err(ArchiveError::RetriesExhausted {
                url: url.to_string(),
                attempts: failures,
                last_error: error.to_string(),
            });
        }

        let delay = self.retry.delay_for_attempt(failures - 1);
        warn!(
            url,
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Retrying after transient error"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(ArchiveError::UnexpectedStatusCode {
                status_code: response.status().as_u16(),
                url: url.to_string(),
            })
        }
    }
}
