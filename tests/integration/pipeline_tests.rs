//! End-to-end segmentation tests against the in-memory remote host.

use std::time::Duration;

use image::DynamicImage;

use widu::error::{JobError, TileError};
use widu::job::{CancelHandle, JobOptions, JobState};
use widu::segment;
use widu::stack::{Calibration, SourceImage};
use widu::tile::TilingParams;

use super::test_utils::{gradient, unscaled_stack, MockSession, Processor, BASE, COMMAND};

fn options() -> JobOptions {
    JobOptions::new(BASE, COMMAND)
}

fn assert_same_pixels(a: &DynamicImage, b: &DynamicImage) {
    assert_eq!(a.width(), b.width());
    assert_eq!(a.height(), b.height());
    assert_eq!(a.to_luma8().as_raw(), b.to_luma8().as_raw());
}

#[tokio::test]
async fn test_segment_single_plane() {
    let mock = MockSession::new();
    let image = unscaled_stack(500, 500, 1, 1);

    let result = segment(mock.clone(), &image, &TilingParams::default(), options(), None)
        .await
        .unwrap();

    let uploaded = mock.uploaded();
    assert_eq!(uploaded.len(), 9);
    assert_eq!(uploaded[0], "0001-0000-0000.png");
    assert_eq!(uploaded[8], "0001-0448-0448.png");
    assert_eq!(result.tiles, 9);

    assert_eq!(result.image.title(), "WIDU_cells");
    assert_eq!(result.image.calibration(), image.calibration());
    assert_same_pixels(result.image.plane(1).unwrap(), image.plane(1).unwrap());

    assert!(result.job_id.starts_with("widu-"));
    assert_eq!(result.history.last(), Some(&JobState::Done));
    assert!(mock.paths_under(&format!("{}/{}", BASE, result.job_id)).is_empty());
    assert!(mock.closed());
    assert_eq!(mock.open_channels(), 0);
}

#[tokio::test]
async fn test_segment_stack_keeps_layout() {
    let mock = MockSession::new();
    let image = unscaled_stack(250, 120, 3, 2);

    let result = segment(mock.clone(), &image, &TilingParams::default(), options(), None)
        .await
        .unwrap();

    // 2 x 1 tiles per plane, 6 planes
    assert_eq!(mock.uploaded().len(), 12);
    assert_eq!(result.image.n_slices(), 3);
    assert_eq!(result.image.n_frames(), 2);
    for frame in 1..=2 {
        for slice in 1..=3 {
            assert_same_pixels(
                result.image.plane_at(slice, frame).unwrap(),
                image.plane_at(slice, frame).unwrap(),
            );
        }
    }
}

#[tokio::test]
async fn test_segment_rescales_back() {
    let mock = MockSession::new();
    let image = SourceImage::single(
        "coarse",
        gradient(200, 150, 0),
        Calibration::new(0.81, "micron"),
    )
    .unwrap();

    let result = segment(mock.clone(), &image, &TilingParams::default(), options(), None)
        .await
        .unwrap();

    // Magnification 2: 400 x 300 gives 2 x 2 tiles
    assert_eq!(mock.uploaded().len(), 4);
    assert_eq!(result.image.width(), 200);
    assert_eq!(result.image.height(), 150);
    assert_eq!(result.image.title(), "WIDU_coarse");
    assert_eq!(result.image.calibration().pixel_width, 0.81);
    assert_eq!(result.image.calibration().unit, "micron");
}

#[tokio::test]
async fn test_segment_reduces_gray_rgb_mask() {
    let mock = MockSession::new().with_processor(Processor::GrayRgbMask);
    let image = unscaled_stack(300, 260, 1, 1);

    let result = segment(mock, &image, &TilingParams::default(), options(), None)
        .await
        .unwrap();

    let plane = result.image.plane(1).unwrap();
    let DynamicImage::ImageLuma8(mask) = plane else {
        panic!("Expected an 8-bit gray result, got {:?}", plane.color());
    };
    let source = image.plane(1).unwrap().to_luma8();
    for (x, y, pixel) in mask.enumerate_pixels() {
        let expected = if source.get_pixel(x, y)[0] > 127 { 255 } else { 0 };
        assert_eq!(pixel[0], expected, "pixel ({}, {})", x, y);
    }
}

#[tokio::test]
async fn test_segment_upload_failure_closes_session() {
    let mock = MockSession::new().failing_write(2);
    let image = unscaled_stack(500, 500, 1, 1);

    let err = segment(mock.clone(), &image, &TilingParams::default(), options(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::Transfer { .. }));
    assert!(mock.closed());
    assert!(mock.commands().is_empty());

    // The partial job directory is left behind
    let leftovers = mock.paths_under(BASE);
    assert!(leftovers.iter().any(|p| p.ends_with("0001-0000-0000.png")));
}

#[tokio::test]
async fn test_segment_corrupt_result_cleans_up() {
    let mock = MockSession::new()
        .with_processor(Processor::CorruptResult("0001-0224-0000.png".to_string()));
    let image = unscaled_stack(300, 300, 1, 1);

    let err = segment(mock.clone(), &image, &TilingParams::default(), options(), None)
        .await
        .unwrap_err();

    match err {
        JobError::Stitching(TileError::Decode { key, .. }) => {
            assert_eq!(key, "0001-0224-0000");
        }
        other => panic!("Expected a decode failure, got {:?}", other),
    }
    assert_eq!(mock.paths_under(BASE), vec![BASE.to_string()]);
    assert!(mock.closed());
}

#[tokio::test]
async fn test_segment_rejects_oversized_image() {
    let mock = MockSession::new();
    let image = SourceImage::single(
        "huge",
        gradient(10_100, 4, 0),
        Calibration::new(0.405, "micron"),
    )
    .unwrap();

    let err = segment(mock.clone(), &image, &TilingParams::default(), options(), None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        JobError::Tiling(TileError::KeyOverflow { .. })
    ));
    assert_eq!(mock.write_attempts(), 0);
    assert!(mock.closed());
}

#[tokio::test]
async fn test_segment_reports_cleanup_failure() {
    let mock = MockSession::new().failing_remove();
    let image = unscaled_stack(300, 300, 1, 1);

    let result = segment(mock.clone(), &image, &TilingParams::default(), options(), None)
        .await
        .unwrap();

    match &result.cleanup_error {
        Some(JobError::Cleanup { path, .. }) => {
            assert_eq!(*path, format!("{}/{}", BASE, result.job_id));
        }
        other => panic!("Expected a cleanup failure, got {:?}", other),
    }
    assert_eq!(result.history.last(), Some(&JobState::Done));
    assert_same_pixels(result.image.plane(1).unwrap(), image.plane(1).unwrap());
    assert!(mock.exists(&format!("{}/{}", BASE, result.job_id)));
    assert!(mock.closed());
}

#[tokio::test]
async fn test_segment_clean_run_has_no_cleanup_error() {
    let mock = MockSession::new();
    let image = unscaled_stack(100, 100, 1, 1);

    let result = segment(mock, &image, &TilingParams::default(), options(), None)
        .await
        .unwrap();

    assert!(result.cleanup_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_segment_returns_when_cancelled_during_command() {
    let mock = MockSession::new().with_processor(Processor::Hang);
    let image = unscaled_stack(300, 300, 1, 1);
    let cancel = CancelHandle::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        canceller.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(60),
        segment(
            mock.clone(),
            &image,
            &TilingParams::default(),
            options(),
            Some(cancel.token()),
        ),
    )
    .await
    .expect("segment should return once cancelled");

    assert!(matches!(outcome, Err(JobError::Cancelled)));
    assert_eq!(mock.commands().len(), 1);
    assert!(mock.aborted());
    assert!(mock.closed());
}
