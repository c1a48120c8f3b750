//! Error types for the archiver
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by the layer that raises them (fetch, playlist,
//! transfer, assembly, configuration) so callers can decide whether to retry,
//! fall back to another strategy, or leave artifacts on disk for inspection.
//!
//! ## Error taxonomy
//!
//! - `NotResumable` - the origin lacks `Accept-Ranges` or `Content-Length`.
//!   This is a capability fact, never retried at the fetch layer; the segment
//!   transfer manager reacts to it by falling back to a whole-body download.
//! - `NetworkError { is_transient: true }` and transient `ReqwestError`s -
//!   connection resets, timeouts, truncated bodies. Absorbed by retry loops in
//!   the fetch client and never surfaced unless an attempt budget runs out.
//! - `AssemblyFailed` - concatenation or remux failed. Fatal for the job; the
//!   partial remux output is discarded and segment temp files stay on disk.
//! - `SegmentFailed` - one segment exhausted its retry/fallback path. Fatal for
//!   the whole job.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our ArchiveError type
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Main error type for the archiver
#[derive(Error, Debug)]
pub enum ArchiveError {
    // ===== Fetch Errors =====

    /// Origin does not support byte-range resume for this URL
    #[error("Origin does not support resumable transfers for {url}: {reason}")]
    NotResumable {
        url: String,
        reason: String,
    },

    /// Network connectivity error
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Server returned unexpected status code
    #[error("Server responded with unexpected status code {status_code} for {url}")]
    UnexpectedStatusCode {
        status_code: u16,
        url: String,
    },

    /// A transfer kept failing with transient errors until its attempt budget ran out
    #[error("Gave up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    /// Metadata probe timed out on every allowed attempt
    #[error("Probe of {url} timed out after {attempts} attempts")]
    ProbeTimedOut {
        url: String,
        attempts: u32,
    },

    /// Content-Range header missing or malformed
    #[error("Invalid Content-Range header: {0}")]
    InvalidContentRange(String),

    /// Resume position is past the expected end of the resource
    #[error("Write position ({position}) exceeds content length ({content_length})")]
    WritePositionExceedsLength {
        position: u64,
        content_length: u64,
    },

    /// Origin answered a ranged request with a start offset we cannot continue from
    #[error("Origin resumed at byte {offered} but only {written} bytes are on disk")]
    ResumeGap {
        offered: u64,
        written: u64,
    },

    /// Invalid or unsupported URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // ===== Playlist Errors =====

    /// Manifest contained no usable entries
    #[error("Playlist has no entries: {0}")]
    EmptyPlaylist(String),

    // ===== Transfer / Job Errors =====

    /// A segment exhausted its retry and fallback path
    #[error("Segment {index} ({url}) failed: {source}")]
    SegmentFailed {
        index: usize,
        url: String,
        #[source]
        source: Box<ArchiveError>,
    },

    /// Concatenation or remux of the segment set failed
    #[error("Assembly of {output:?} failed: {reason}")]
    AssemblyFailed {
        output: PathBuf,
        reason: String,
    },

    // ===== Remux Errors =====

    /// External remux process exited unsuccessfully
    #[error("Remux failed: {0}")]
    RemuxFailed(String),

    /// Remux tool binary not found
    #[error("Remux tool not found: {0}. Please install FFmpeg and ensure it's in your PATH.")]
    RemuxToolNotFound(String),

    // ===== File Errors =====

    /// File or directory not found
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// Invalid file path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // ===== Configuration Errors =====

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ===== General Errors =====

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<std::string::FromUtf8Error> for ArchiveError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        ArchiveError::InternalError(format!("UTF-8 conversion error: {}", err))
    }
}

impl From<url::ParseError> for ArchiveError {
    fn from(err: url::ParseError) -> Self {
        ArchiveError::InvalidUrl(err.to_string())
    }
}

// Helper methods for creating common errors
impl ArchiveError {
    /// Create a NotResumable error
    pub fn not_resumable<U: Into<String>, R: Into<String>>(url: U, reason: R) -> Self {
        ArchiveError::NotResumable {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a NetworkError
    pub fn network_error<S: Into<String>>(message: S, is_transient: bool) -> Self {
        ArchiveError::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Create an AssemblyFailed error
    pub fn assembly_failed<P: Into<PathBuf>, S: Into<String>>(output: P, reason: S) -> Self {
        ArchiveError::AssemblyFailed {
            output: output.into(),
            reason: reason.into(),
        }
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        ArchiveError::InternalError(message.into())
    }

    /// Check if the error is a transient transport failure
    ///
    /// Returns `true` for failures that may succeed when the same transfer is
    /// attempted again:
    /// - Network errors marked as transient
    /// - reqwest connect, timeout, request and body errors
    /// - Mid-stream I/O errors surfaced while reading a response
    /// - 5xx and 429 responses
    pub fn is_transient(&self) -> bool {
        match self {
            ArchiveError::NetworkError { is_transient, .. } => *is_transient,
            ArchiveError::ReqwestError(e) => is_transient_reqwest_error(e),
            ArchiveError::UnexpectedStatusCode { status_code, .. } => {
                *status_code == 429 || (500..=599).contains(status_code)
            }
            ArchiveError::ProbeTimedOut { .. } => true,
            _ => false,
        }
    }

    /// Check if the error reports a missing range/length capability
    pub fn is_not_resumable(&self) -> bool {
        matches!(self, ArchiveError::NotResumable { .. })
    }

    /// Check if the error came from the concat/remux phase
    pub fn is_assembly_error(&self) -> bool {
        matches!(
            self,
            ArchiveError::AssemblyFailed { .. }
                | ArchiveError::RemuxFailed(_)
                | ArchiveError::RemuxToolNotFound(_)
        )
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            ArchiveError::RemuxToolNotFound(tool) => {
                format!("'{}' is required to assemble segmented streams but was not found. Please install FFmpeg and ensure it's in your PATH.", tool)
            }
            ArchiveError::SegmentFailed { index, source, .. } => {
                format!(
                    "Segment {} could not be downloaded ({}). Already downloaded segments were kept; run the download again to resume.",
                    index,
                    source.user_message()
                )
            }
            ArchiveError::AssemblyFailed { output, reason } => {
                format!(
                    "Could not produce {}: {}. Downloaded segments were kept for another attempt.",
                    output.display(),
                    reason
                )
            }
            ArchiveError::RetriesExhausted { url, attempts, .. } => {
                format!("Download of {} kept failing after {} attempts. Please try again later.", url, attempts)
            }
            _ => self.to_string(),
        }
    }
}

/// Classify a reqwest error as transient or permanent.
///
/// Transient: connect, timeout, request and body read errors.
/// Permanent: redirect loops, builder errors and status errors.
pub fn is_transient_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ArchiveError::network_error("connection reset", true).is_transient());
        assert!(!ArchiveError::network_error("bad scheme", false).is_transient());
        assert!(ArchiveError::UnexpectedStatusCode {
            status_code: 503,
            url: "https://example.com/a.ts".to_string(),
        }
        .is_transient());
        assert!(!ArchiveError::UnexpectedStatusCode {
            status_code: 404,
            url: "https://example.com/a.ts".to_string(),
        }
        .is_transient());
        assert!(!ArchiveError::not_resumable("https://example.com/a.ts", "no Accept-Ranges").is_transient());
        assert!(ArchiveError::ProbeTimedOut {
            url: "https://example.com/a.ts".to_string(),
            attempts: 2,
        }
        .is_transient());
    }

    #[test]
    fn test_not_resumable_is_distinct() {
        let err = ArchiveError::not_resumable("https://example.com/a.ts", "no Content-Length");
        assert!(err.is_not_resumable());
        assert!(!err.is_assembly_error());
    }

    #[test]
    fn test_segment_failure_user_message() {
        let err = ArchiveError::SegmentFailed {
            index: 3,
            url: "https://example.com/s3.ts".to_string(),
            source: Box::new(ArchiveError::RetriesExhausted {
                url: "https://example.com/s3.ts".to_string(),
                attempts: 4,
                last_error: "connection reset".to_string(),
            }),
        };
        let message = err.user_message();
        assert!(message.contains("Segment 3"));
        assert!(message.contains("4 attempts"));
    }
}
