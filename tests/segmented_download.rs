mod common;

use archiver_core::download::assembler::{scratch_path, staging_path};
use archiver_core::download::progress::{DownloadProgress, DownloadState, ProgressCallback};
use archiver_core::download::segment::segment_temp_path;
use archiver_core::download::{Assembler, VariantPolicy};
use archiver_core::{ArchiveError, DownloadOutcome, SegmentedDownloader};
use axum::http::{Method, StatusCode};
use common::{payload, test_client, CopyRemuxer, FailingRemuxer, HangingRemuxer, Origin, Resource};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const MASTER: &str = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=250000,RESOLUTION=256x144\n\
low/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=700000,RESOLUTION=640x360\n\
mid/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720\n\
high/index.m3u8\n";

const VARIANT: &str = "#EXTM3U\n\
#EXT-X-TARGETDURATION:10\n\
#EXTINF:10.0,\n\
seg0.ts\n\
#EXTINF:10.0,\n\
seg1.ts\n\
#EXTINF:10.0,\n\
seg2.ts\n\
#EXT-X-ENDLIST\n";

struct Stream {
    origin: Origin,
    segments: Vec<Vec<u8>>,
}

impl Stream {
    fn expected(&self) -> Vec<u8> {
        self.segments.concat()
    }
}

async fn publish() -> Stream {
    let origin = Origin::start().await;
    origin.add("/vod/ep1/master.m3u8", Resource::plain(MASTER));
    for variant in ["low", "mid", "high"] {
        origin.add(&format!("/vod/ep1/{}/index.m3u8", variant), Resource::plain(VARIANT));
    }

    let segments: Vec<Vec<u8>> = (0..3).map(|i| payload(1500 + i * 100, i as u8)).collect();
    for (i, bytes) in segments.iter().enumerate() {
        origin.add(&format!("/vod/ep1/high/seg{}.ts", i), Resource::ranged(bytes.clone()));
    }

    Stream { origin, segments }
}

fn downloader(remuxer: Arc<dyn archiver_core::Remuxer>) -> SegmentedDownloader {
    SegmentedDownloader::new(test_client(8), Assembler::new(remuxer))
}

#[tokio::test]
async fn test_stream_is_assembled_from_last_variant() {
    let stream = publish().await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("episodes").join("episode_1_2.mp4");

    let report = downloader(Arc::new(CopyRemuxer))
        .download_segmented_stream(&stream.origin.url("/vod/ep1/master.m3u8"), &output)
        .await
        .unwrap();

    assert_eq!(report.outcome, DownloadOutcome::Downloaded);
    assert_eq!(report.segments, 3);
    assert_eq!(report.bytes, stream.expected().len() as u64);
    assert_eq!(std::fs::read(&output).unwrap(), stream.expected());

    assert_eq!(stream.origin.count(Method::GET, "/vod/ep1/high/index.m3u8"), 1);
    assert_eq!(stream.origin.count(Method::GET, "/vod/ep1/low/index.m3u8"), 0);
    assert_eq!(stream.origin.count(Method::GET, "/vod/ep1/mid/index.m3u8"), 0);

    for index in 0..3 {
        assert!(!segment_temp_path(&output, index).exists());
    }
    assert!(!scratch_path(&output).exists());
}

#[tokio::test]
async fn test_highest_bandwidth_policy_matches_ascending_master() {
    let stream = publish().await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");

    downloader(Arc::new(CopyRemuxer))
        .with_variant_policy(VariantPolicy::HighestBandwidth)
        .download_segmented_stream(&stream.origin.url("/vod/ep1/master.m3u8"), &output)
        .await
        .unwrap();

    assert_eq!(stream.origin.count(Method::GET, "/vod/ep1/high/index.m3u8"), 1);
    assert_eq!(std::fs::read(&output).unwrap(), stream.expected());
}

#[tokio::test]
async fn test_existing_output_makes_no_requests() {
    let stream = publish().await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    std::fs::write(&output, b"already archived").unwrap();

    let report = downloader(Arc::new(CopyRemuxer))
        .download_segmented_stream(&stream.origin.url("/vod/ep1/master.m3u8"), &output)
        .await
        .unwrap();

    assert_eq!(report.outcome, DownloadOutcome::AlreadyPresent);
    assert_eq!(stream.origin.request_count(), 0);
    assert_eq!(std::fs::read(&output).unwrap(), b"already archived");
}

#[tokio::test]
async fn test_segments_are_ordered_by_index_not_completion() {
    let stream = publish().await;
    // segment 0 finishes last, segment 2 first
    stream.origin.add(
        "/vod/ep1/high/seg0.ts",
        Resource::ranged(stream.segments[0].clone()).with_delay(Duration::from_millis(300)),
    );
    stream.origin.add(
        "/vod/ep1/high/seg1.ts",
        Resource::ranged(stream.segments[1].clone()).with_delay(Duration::from_millis(150)),
    );

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    downloader(Arc::new(CopyRemuxer))
        .download_segmented_stream(&stream.origin.url("/vod/ep1/master.m3u8"), &output)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), stream.expected());
}

#[tokio::test]
async fn test_remux_failure_keeps_segments_for_rerun() {
    let stream = publish().await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    let master = stream.origin.url("/vod/ep1/master.m3u8");

    let err = downloader(Arc::new(FailingRemuxer))
        .download_segmented_stream(&master, &output)
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::AssemblyFailed { .. }));
    assert!(!output.exists());
    assert!(!scratch_path(&output).exists());
    for index in 0..3 {
        assert!(segment_temp_path(&output, index).exists());
    }

    // a rerun only probes the cached segments
    downloader(Arc::new(CopyRemuxer))
        .download_segmented_stream(&master, &output)
        .await
        .unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), stream.expected());
    for index in 0..3 {
        assert_eq!(
            stream.origin.count(Method::GET, &format!("/vod/ep1/high/seg{}.ts", index)),
            1
        );
    }
}

#[tokio::test]
async fn test_failed_segment_fails_job_and_keeps_finished_segments() {
    let stream = publish().await;
    stream.origin.add(
        "/vod/ep1/high/seg1.ts",
        Resource::ranged(stream.segments[1].clone()).with_get_status(StatusCode::FORBIDDEN),
    );

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    let err = downloader(Arc::new(CopyRemuxer))
        .download_segmented_stream(&stream.origin.url("/vod/ep1/master.m3u8"), &output)
        .await
        .unwrap_err();

    match err {
        ArchiveError::SegmentFailed { index, .. } => assert_eq!(index, 1),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!output.exists());
    assert_eq!(
        std::fs::read(segment_temp_path(&output, 0)).unwrap(),
        stream.segments[0]
    );
    assert_eq!(
        std::fs::read(segment_temp_path(&output, 2)).unwrap(),
        stream.segments[2]
    );
}

#[tokio::test]
async fn test_empty_variant_is_an_error() {
    let origin = Origin::start().await;
    origin.add("/vod/master.m3u8", Resource::plain("#EXTM3U\nonly/index.m3u8\n"));
    origin.add("/vod/only/index.m3u8", Resource::plain("#EXTM3U\n#EXT-X-ENDLIST\n"));

    let dir = tempfile::tempdir().unwrap();
    let err = downloader(Arc::new(CopyRemuxer))
        .download_segmented_stream(&origin.url("/vod/master.m3u8"), &dir.path().join("out.mp4"))
        .await
        .unwrap_err();

    assert!(matches!(err, ArchiveError::EmptyPlaylist(_)));
}

#[tokio::test]
async fn test_progress_reaches_total() {
    let stream = publish().await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");

    let updates: Arc<Mutex<Vec<DownloadProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    let callback: ProgressCallback = Arc::new(move |p: DownloadProgress| sink.lock().unwrap().push(p));
    downloader(Arc::new(CopyRemuxer))
        .download_segmented_stream_with_progress(
            &stream.origin.url("/vod/ep1/master.m3u8"),
            &output,
            Some(callback),
        )
        .await
        .unwrap();

    let updates = updates.lock().unwrap();
    let last = updates.last().unwrap();
    assert_eq!(last.state, DownloadState::Completed);
    assert_eq!(last.units_total, stream.expected().len() as u64);
    assert_eq!(last.units_completed, last.units_total);
    assert!(updates.iter().any(|p| p.state == DownloadState::Assembling));
}

#[tokio::test]
async fn test_interrupted_assembly_leaves_no_output() {
    let stream = publish().await;
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    let master = stream.origin.url("/vod/ep1/master.m3u8");

    let interrupted = tokio::time::timeout(
        Duration::from_secs(2),
        downloader(Arc::new(HangingRemuxer)).download_segmented_stream(&master, &output),
    )
    .await;

    assert!(interrupted.is_err());
    assert!(!output.exists());

    let report = downloader(Arc::new(CopyRemuxer))
        .download_segmented_stream(&master, &output)
        .await
        .unwrap();

    assert_eq!(report.outcome, DownloadOutcome::Downloaded);
    assert_eq!(std::fs::read(&output).unwrap(), stream.expected());
    assert!(!staging_path(&output).exists());
    for index in 0..3 {
        assert_eq!(
            stream.origin.count(Method::GET, &format!("/vod/ep1/high/seg{}.ts", index)),
            1
        );
    }
}

#[tokio::test]
async fn test_permit_pool_caps_concurrent_segment_gets() {
    let origin = Origin::start().await;
    let mut variant = String::from("#EXTM3U\n#EXT-X-TARGETDURATION:10\n");
    let mut segments = Vec::new();
    for index in 0..8 {
        variant.push_str(&format!("#EXTINF:10.0,\nseg{}.ts\n", index));
        let bytes = payload(800, index as u8);
        origin.add(
            &format!("/live/seg{}.ts", index),
            Resource::ranged(bytes.clone()).with_delay(Duration::from_millis(200)),
        );
        segments.push(bytes);
    }
    variant.push_str("#EXT-X-ENDLIST\n");
    origin.add("/live/master.m3u8", Resource::plain("#EXTM3U\nindex.m3u8\n"));
    origin.add("/live/index.m3u8", Resource::plain(variant));

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    let started = Instant::now();
    SegmentedDownloader::new(test_client(2), Assembler::new(Arc::new(CopyRemuxer)))
        .download_segmented_stream(&origin.url("/live/master.m3u8"), &output)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(origin.peak_gets_in_flight() <= 2);
    // eight 200ms GETs, two at a time
    assert!(elapsed >= Duration::from_millis(800), "took {:?}", elapsed);
    assert_eq!(std::fs::read(&output).unwrap(), segments.concat());
    for index in 0..8 {
        assert_eq!(origin.count(Method::GET, &format!("/live/seg{}.ts", index)), 1);
    }
}

#[tokio::test]
async fn test_interrupted_segment_resumes_inside_stream() {
    let origin = Origin::start().await;
    origin.add(
        "/show/master.m3u8",
        Resource::plain("#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1\nv1.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2\nv2.m3u8\n"),
    );
    origin.add("/show/v1.m3u8", Resource::plain("#EXTM3U\nother.ts\n"));
    origin.add("/show/v2.m3u8", Resource::plain("#EXTM3U\ns0.ts\ns1.ts\n"));
    let s0 = payload(1024, 40);
    let s1 = payload(1024, 41);
    origin.add("/show/s0.ts", Resource::ranged(s0.clone()));
    origin.add(
        "/show/s1.ts",
        Resource::ranged(s1.clone()).failing_first_get_after(512),
    );

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    let report = downloader(Arc::new(CopyRemuxer))
        .download_segmented_stream(&origin.url("/show/master.m3u8"), &output)
        .await
        .unwrap();

    let written = std::fs::read(&output).unwrap();
    assert_eq!(written.len(), 2048);
    assert_eq!(written, [s0, s1].concat());
    assert_eq!(report.segments, 2);
    assert_eq!(origin.count(Method::GET, "/show/v1.m3u8"), 0);
    assert_eq!(
        origin.ranges("/show/s1.ts"),
        vec![
            Some("bytes=0-1023".to_string()),
            Some("bytes=512-1023".to_string()),
        ]
    );
}
