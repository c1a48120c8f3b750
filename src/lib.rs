//! Resumable media acquisition for broadcast episode archives
//!
//! Segmented streams are resolved from a master manifest, fetched segment by
//! segment under a shared permit pool, and remuxed into one file. Single
//! files are fetched through a `.tmp` path and renamed when complete. Both
//! resume from whatever an earlier run left on disk.

pub mod archive;
pub mod config;
pub mod download;
pub mod error;
pub mod naming;
pub mod remux;

pub use archive::{ArchivedEpisode, Archiver, EpisodeResult, EpisodeSource, SourceKind};
pub use config::EngineConfig;
pub use download::{
    DirectFileDownloader, DownloadOutcome, DownloadReport, FetchClient, PermitPool, SegmentedDownloader,
};
pub use error::{ArchiveError, Result};
pub use naming::OutputNaming;
pub use remux::{FfmpegRemuxer, Remuxer};
