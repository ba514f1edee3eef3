mod common;

use common::{MemoryEncoderFactory, ScriptedMasker, SyntheticSource, assert_clips_consistent, test_config};
use motion_clip::{Episode, MotionConfig, MotionError, MotionPipeline, Termination};
use std::sync::Arc;
use std::time::Duration;

fn pairs(episodes: &[Episode]) -> Vec<(u64, u64)> {
    episodes
        .iter()
        .map(|e| (e.start_frame_index, e.end_frame_index))
        .collect()
}

fn pipeline(config: MotionConfig, motion: Vec<std::ops::Range<u64>>, encoder: &Arc<MemoryEncoderFactory>) -> MotionPipeline {
    MotionPipeline::new(config)
        .with_masker(Box::new(ScriptedMasker::new(motion)))
        .with_encoder(encoder.clone())
}

#[tokio::test]
async fn motion_stop_is_confirmed_after_the_delay() {
    let out = tempfile::tempdir().expect("tempdir");
    let encoder = Arc::new(MemoryEncoderFactory::new());
    let mut source = SyntheticSource::single(10.0, 260);

    let report = pipeline(test_config(out.path()), vec![10..200], &encoder)
        .run(&mut source)
        .await;

    assert!(matches!(report.termination, Termination::EndOfStream));
    assert_eq!(pairs(report.run_log.episodes("session")), vec![(10, 250)]);
    assert_eq!(report.frames_processed, 260);
    assert_eq!(report.open_episode_start, None);
    assert!(report.writer_failures.is_empty());

    assert_eq!(report.clips.len(), 1);
    let recorded = encoder.recorded();
    assert_eq!(recorded.len(), 1);
    assert_clips_consistent(&recorded);
    let clip = &report.clips[0];
    assert!(clip.path.starts_with(out.path()));
    let name = clip.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("testcam_") && name.ends_with(".mp4"), "unexpected clip name {name}");
    // The clip ends on the closing frame, not on whatever was pushed after it.
    assert_eq!(clip.last_frame_index, Some(250));
}

fn roomy_config(out: &std::path::Path) -> MotionConfig {
    MotionConfig {
        // 1000 frames at 10 fps, so nothing is evicted while a writer lags.
        buffer_seconds: 100.0,
        ..test_config(out)
    }
}

#[tokio::test]
async fn a_lagging_writer_stops_at_the_closing_frame() {
    let out = tempfile::tempdir().expect("tempdir");
    let encoder = Arc::new(MemoryEncoderFactory::slow(Duration::from_millis(2)));
    let mut source = SyntheticSource::single(10.0, 150);

    let report = pipeline(roomy_config(out.path()), vec![10..20], &encoder)
        .run(&mut source)
        .await;

    assert_eq!(pairs(report.run_log.episodes("session")), vec![(10, 70)]);
    assert_eq!(report.clips.len(), 1);
    let clip = &report.clips[0];
    assert_eq!(clip.first_frame_index, Some(0));
    assert_eq!(clip.last_frame_index, Some(70));
    assert!(clip.preroll_frames >= 11);
    assert_eq!(encoder.recorded()[&clip.path].frames, (0..=70).collect::<Vec<_>>());
    // Nothing was dropped while the writer lagged.
    assert_eq!(report.frames_evicted, 0);
}

#[tokio::test]
async fn back_to_back_episodes_hand_over_the_pre_roll() {
    let out = tempfile::tempdir().expect("tempdir");
    let encoder = Arc::new(MemoryEncoderFactory::slow(Duration::from_millis(2)));
    let mut source = SyntheticSource::single(10.0, 200);

    let report = pipeline(roomy_config(out.path()), vec![10..20, 100..110], &encoder)
        .run(&mut source)
        .await;

    assert_eq!(pairs(report.run_log.episodes("session")), vec![(10, 70), (100, 160)]);
    assert!(report.writer_failures.is_empty());
    assert_eq!(report.clips.len(), 2);
    let recorded = encoder.recorded();
    assert_clips_consistent(&recorded);

    let first = &report.clips[0];
    assert_eq!(first.first_frame_index, Some(0));
    assert_eq!(first.last_frame_index, Some(70));

    // The second clip starts where the first one stopped, well before its own
    // start frame, and reaches its closing frame.
    let second = &report.clips[1];
    assert_eq!(second.first_frame_index, Some(71));
    assert_eq!(second.last_frame_index, Some(160));
    assert!(second.preroll_frames >= 30);
    assert_eq!(recorded[&second.path].frames, (71..=160).collect::<Vec<_>>());
}

#[tokio::test]
async fn warm_up_frames_never_open_an_episode() {
    let out = tempfile::tempdir().expect("tempdir");
    let encoder = Arc::new(MemoryEncoderFactory::new());
    let mut source = SyntheticSource::single(10.0, 100);

    // Motion from the very first frame is hidden by the ten-frame warm-up.
    let report = pipeline(test_config(out.path()), vec![0..30], &encoder)
        .run(&mut source)
        .await;

    assert_eq!(pairs(report.run_log.episodes("session")), vec![(10, 80)]);
}

#[tokio::test]
async fn long_motion_rotates_clips_without_logging_splits() {
    let out = tempfile::tempdir().expect("tempdir");
    let encoder = Arc::new(MemoryEncoderFactory::new());
    let config = MotionConfig {
        // 30 frames at 10 fps.
        max_clip_minutes: 0.05,
        ..test_config(out.path())
    };
    let mut source = SyntheticSource::single(10.0, 160);

    let report = pipeline(config, vec![10..100], &encoder).run(&mut source).await;

    // Opens at 10, splits at 41, re-opens at 42, splits at 73, re-opens at 74.
    assert_eq!(pairs(report.run_log.episodes("session")), vec![(74, 150)]);
    assert_eq!(report.clips.len(), 3);
    let recorded = encoder.recorded();
    assert_eq!(recorded.len(), 3);
    assert_clips_consistent(&recorded);
    // Each rotated clip picks up right after the split frame of the one before.
    let bounds: Vec<_> = report
        .clips
        .iter()
        .map(|c| (c.first_frame_index, c.last_frame_index))
        .collect();
    assert_eq!(bounds[1..], [(Some(42), Some(73)), (Some(74), Some(150))]);
    assert_eq!(report.clips[0].last_frame_index, Some(41));
}

#[tokio::test]
async fn disabled_recording_still_logs_episodes() {
    let out = tempfile::tempdir().expect("tempdir");
    let encoder = Arc::new(MemoryEncoderFactory::new());
    let config = MotionConfig {
        save_video: false,
        max_clip_minutes: 0.05,
        ..test_config(out.path())
    };
    let mut source = SyntheticSource::single(10.0, 260);

    let report = pipeline(config, vec![10..200], &encoder).run(&mut source).await;

    // Without a writer there is nothing to split.
    assert_eq!(pairs(report.run_log.episodes("session")), vec![(10, 250)]);
    assert!(report.clips.is_empty());
    assert!(encoder.recorded().is_empty());
    // Nothing drains the buffer, so everything beyond its 50 frames was evicted.
    assert_eq!(report.frames_evicted, 210);
}

#[tokio::test]
async fn removed_output_folder_aborts_but_keeps_the_partial_log() {
    let root = tempfile::tempdir().expect("tempdir");
    let out = root.path().join("clips");
    std::fs::create_dir(&out).unwrap();
    let encoder = Arc::new(MemoryEncoderFactory::new());
    let config = MotionConfig {
        delay_seconds: 1.0,
        ..test_config(&out)
    };
    let doomed = out.clone();
    let mut source = SyntheticSource::single(10.0, 300).with_hook(120, move || {
        std::fs::remove_dir_all(&doomed).expect("folder should be removable");
    });

    let report = pipeline(config, vec![10..30, 100..200], &encoder)
        .run(&mut source)
        .await;

    assert!(report.is_aborted());
    assert!(matches!(
        report.termination,
        Termination::Aborted(MotionError::OutputFolderUnavailable(ref path)) if *path == out
    ));
    assert_eq!(pairs(report.run_log.episodes("session")), vec![(10, 40)]);
    assert_eq!(report.frames_processed, 120);
    assert_eq!(report.open_episode_start, Some(100));
    // Both writers were still joined and finalized.
    assert_eq!(report.clips.len(), 2);
    assert_clips_consistent(&encoder.recorded());
}

#[tokio::test]
async fn a_failing_writer_only_loses_its_own_clip() {
    let out = tempfile::tempdir().expect("tempdir");
    let encoder = Arc::new(MemoryEncoderFactory::failing(vec![0]));
    let config = MotionConfig {
        delay_seconds: 1.0,
        ..test_config(out.path())
    };
    let mut source = SyntheticSource::single(10.0, 150);

    let report = pipeline(config, vec![10..20, 100..110], &encoder)
        .run(&mut source)
        .await;

    assert!(matches!(report.termination, Termination::EndOfStream));
    assert_eq!(pairs(report.run_log.episodes("session")), vec![(10, 30), (100, 120)]);
    assert_eq!(report.writer_failures.len(), 1);
    assert!(matches!(report.writer_failures[0].1, MotionError::EncoderFailed { .. }));
    assert_eq!(report.clips.len(), 1);

    let recorded = encoder.recorded();
    assert_clips_consistent(&recorded);
    let failed = &recorded[&report.writer_failures[0].0];
    assert!(failed.frames.is_empty());
    let saved = &recorded[&report.clips[0].path];
    assert!(saved.frames.contains(&100));
}

#[tokio::test]
async fn episodes_are_logged_under_the_clip_they_close_in() {
    let out = tempfile::tempdir().expect("tempdir");
    let encoder = Arc::new(MemoryEncoderFactory::new());
    let config = MotionConfig {
        delay_seconds: 1.0,
        save_video: false,
        ..test_config(out.path())
    };
    let mut source = SyntheticSource::new(10.0, &[("morning", 60), ("evening", 100)]);

    let report = pipeline(config, vec![10..20, 70..80], &encoder)
        .run(&mut source)
        .await;

    // Frame indices keep counting across clips.
    assert_eq!(pairs(report.run_log.episodes("morning")), vec![(10, 30)]);
    assert_eq!(pairs(report.run_log.episodes("evening")), vec![(70, 90)]);
    assert_eq!(report.frames_processed, 160);
}

#[tokio::test]
async fn an_open_episode_at_end_of_stream_is_reported_not_logged() {
    let out = tempfile::tempdir().expect("tempdir");
    let encoder = Arc::new(MemoryEncoderFactory::new());
    let mut source = SyntheticSource::single(10.0, 100);

    let report = pipeline(test_config(out.path()), vec![40..100], &encoder)
        .run(&mut source)
        .await;

    assert!(report.run_log.is_empty());
    assert_eq!(report.open_episode_start, Some(40));
    // The writer of the open episode is still finalized.
    assert_eq!(report.clips.len(), 1);
    assert_clips_consistent(&encoder.recorded());
}

#[tokio::test]
async fn missing_output_folder_aborts_before_the_first_frame() {
    let root = tempfile::tempdir().expect("tempdir");
    let encoder = Arc::new(MemoryEncoderFactory::new());
    let mut source = SyntheticSource::single(10.0, 20);

    let report = pipeline(test_config(&root.path().join("absent")), vec![], &encoder)
        .run(&mut source)
        .await;

    assert!(report.is_aborted());
    assert_eq!(report.frames_processed, 0);
    assert!(report.run_log.episodes("session").is_empty());
}

#[tokio::test]
async fn invalid_frame_rate_aborts_the_run() {
    let out = tempfile::tempdir().expect("tempdir");
    let encoder = Arc::new(MemoryEncoderFactory::new());
    let mut source = SyntheticSource::single(0.0, 20);

    let report = pipeline(test_config(out.path()), vec![], &encoder)
        .run(&mut source)
        .await;

    assert!(matches!(
        report.termination,
        Termination::Aborted(MotionError::InvalidFrameRate(_))
    ));
}
