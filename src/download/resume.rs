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


//! Resume position bookkeeping
//!
//! # Resume Mechanism
//! 1. Probe the origin for `Accept-Ranges` and `Content-Length`
//! 2. Build a [`ResumeCursor`] from the on-disk size and the probed length
//! 3. Send `Range: bytes={written}-{total - 1}`
//! 4. Server responds with 206 and `Content-Range: bytes {start}-{end}/{total}`
//! 5. Seek to `start` and append
//!
//! The cursor is rebuilt at the top of every attempt; nothing about the
//! origin is cached between attempts.

use crate::error::{ArchiveError, Result};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CONTENT_RANGE: Regex =
        Regex::new(r"^\s*bytes\s+(\d+)-(\d+)/(\d+|\*)\s*$").expect("valid Content-Range pattern");
}

/// Byte offset at which a resumed transfer continues
///
/// Invariant: `written <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeCursor {
    written: u64,
    total: u64,
}

impl ResumeCursor {
    /// Build a cursor, rejecting a write position past the end of the resource
    pub fn new(written: u64, total: u64) -> Result<Self> {
        if written > total {
            return Err(ArchiveError::WritePositionExceedsLength {
                position: written,
                content_length: total,
            });
        }
        Ok(Self { written, total })
    }

    /// Bytes already confirmed on disk
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Expected size of the complete resource
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn remaining(&self) -> u64 {
        self.total - self.written
    }

    pub fn is_complete(&self) -> bool {
        self.written == self.total
    }

    /// `Range` header value requesting everything not yet written
    ///
    /// Only meaningful while the cursor is incomplete.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.written, self.total.saturating_sub(1))
    }

    /// Move the cursor to the start offset the origin confirmed
    ///
    /// An origin may restart earlier than requested (the overlap is rewritten);
    /// starting later would leave a hole in the file.
    pub fn rewind_to(&mut self, confirmed_start: u64) -> Result<()> {
        if confirmed_start > self.written {
            return Err(ArchiveError::ResumeGap {
                offered: confirmed_start,
                written: self.written,
            });
        }
        self.written = confirmed_start;
        Ok(())
    }

    /// Record `len` freshly flushed bytes
    pub fn advance(&mut self, len: u64) -> Result<()> {
        let next = self.written + len;
        if next > self.total {
            return Err(ArchiveError::WritePositionExceedsLength {
                position: next,
                content_length: self.total,
            });
        }
        self.written = next;
        Ok(())
    }
}

/// Parsed `Content-Range` response header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    /// `None` when the origin sent `*`
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parse `bytes {start}-{end}/{total}`
    pub fn parse(value: &str) -> Result<Self> {
        let caps = CONTENT_RANGE
            .captures(value)
            .ok_or_else(|| ArchiveError::InvalidContentRange(value.to_string()))?;

        let number = |i: usize| -> Result<u64> {
            caps[i]
                .parse::<u64>()
                .map_err(|_| ArchiveError::InvalidContentRange(value.to_string()))
        };

        let start = number(1)?;
        let end = number(2)?;
        let total = if &caps[3] == "*" { None } else { Some(number(3)?) };

        if end < start {
            return Err(ArchiveError::InvalidContentRange(value.to_string()));
        }

        Ok(Self { start, end, total })
    }
}
