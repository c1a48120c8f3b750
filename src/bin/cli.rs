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


use anyhow::{bail, Context};
use archiver_core::download::progress::{DownloadProgress, ProgressCallback};
use archiver_core::{
    Archiver, DirectFileDownloader, DownloadOutcome, DownloadReport, EngineConfig, EpisodeSource, FetchClient,
    FfmpegRemuxer, PermitPool, SegmentedDownloader,
};
use archiver_core::download::Assembler;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "archiver-cli")]
#[command(about = "Download and archive broadcast episodes", long_about = None)]
struct Cli {
    /// JSON engine configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// How many HTTP requests may run at once
    #[arg(long, global = true)]
    parallelism: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a segmented stream and remux it into one file
    Stream {
        /// Master manifest URL
        manifest_url: String,
        /// Output file
        output: PathBuf,
    },
    /// Download a single file
    File {
        url: String,
        output: PathBuf,
    },
    /// Archive one episode, falling back to its file URL if the stream fails
    Episode {
        programme_id: String,
        episode_id: String,
        #[arg(long)]
        manifest: Option<String>,
        #[arg(long)]
        file: Option<String>,
        /// Directory to store downloaded files
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Skip the stream and download the file directly
        #[arg(long)]
        prefer_direct: bool,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(parallelism) = cli.parallelism {
        config.max_concurrent_requests = parallelism;
    }
    config.validate()?;
    Ok(config)
}

fn progress_printer() -> ProgressCallback {
    Arc::new(|progress: DownloadProgress| {
        println!("{}", progress.display_string());
    })
}

fn print_report(report: &DownloadReport) {
    match report.outcome {
        DownloadOutcome::AlreadyPresent => {
            println!("Already present: {}", report.output_path.display());
        }
        DownloadOutcome::Downloaded => {
            let elapsed = report.finished_at - report.started_at;
            println!(
                "Saved {} ({}, {} segments, {}s)",
                report.output_path.display(),
                DownloadProgress::bytes_string(report.bytes),
                report.segments,
                elapsed.num_seconds()
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let permits = PermitPool::new(config.max_concurrent_requests);
    let client = FetchClient::new(&config, permits)?;

    match cli.command {
        Commands::Stream { manifest_url, output } => {
            let remuxer = Arc::new(FfmpegRemuxer::from_config(&config));
            let downloader = SegmentedDownloader::new(client, Assembler::new(remuxer));
            let report = downloader
                .download_segmented_stream_with_progress(&manifest_url, &output, Some(progress_printer()))
                .await?;
            print_report(&report);
        }
        Commands::File { url, output } => {
            let report = DirectFileDownloader::new(client)
                .download_direct_file_with_progress(&url, &output, Some(progress_printer()))
                .await?;
            print_report(&report);
        }
        Commands::Episode {
            programme_id,
            episode_id,
            manifest,
            file,
            out_dir,
            prefer_direct,
        } => {
            if manifest.is_none() && file.is_none() {
                bail!("an episode needs --manifest, --file, or both");
            }
            let source = EpisodeSource {
                programme_id,
                episode_id,
                manifest_url: manifest,
                file_url: file,
            };
            let remuxer = Arc::new(FfmpegRemuxer::from_config(&config));
            let archived = Archiver::with_parts(client, remuxer, out_dir)
                .prefer_direct(prefer_direct)
                .archive_episode(&source)
                .await?;
            println!("Archived from {:?} source", archived.kind);
            print_report(&archived.report);
        }
    }

    Ok(())
}
