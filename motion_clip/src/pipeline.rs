// THEORY:
// The `pipeline` module is the top-level API of the recorder. It owns the
// ingestion loop, the single logical thread of control that pulls frames from a
// `FrameSource` and drives every other component:
//
//   Frame Source -> Motion Classifier -> Pre-roll Buffer -> Episode State Machine
//                                              |                   |
//                                              +--> Clip Writer <--+ (spawn / stop)
//
// Key architectural principles:
// 1.  **One producer, at most one live consumer**: the loop is the only writer
//     of the pre-roll buffer. A clip writer is spawned when an episode opens and
//     signalled when it closes or splits. A signalled writer "retires": it keeps
//     draining in the background up to the frame it was stopped on, and is
//     awaited before the next writer starts, so two writers never consume the
//     buffer at the same time. Frames after the stop frame stay buffered as the
//     next clip's pre-roll.
// 2.  **Fatal vs. scoped failures**: a missing output folder or a broken source
//     aborts the whole run. A failing writer only loses its own clip; the
//     failure is collected in the report and the loop carries on.
// 3.  **Always report**: `run` never returns an error. Whatever ended the run,
//     writers are joined and the Run Log accumulated so far is handed back
//     together with a `Termination` that tells end-of-stream and abort apart.

use crate::config::MotionConfig;
use crate::core_modules::background_model::{ForegroundMasker, masker_for};
use crate::core_modules::clip_writer::{ClipSummary, ClipWriter, ClipWriterHandle};
use crate::core_modules::encoder::{ClipNamer, EncoderFactory, FfmpegEncoderFactory};
use crate::core_modules::episode::{EpisodeState, EpisodeStateMachine, EpisodeThresholds, RunLog, Transition};
use crate::core_modules::frame::Frame;
use crate::core_modules::frame_source::FrameSource;
use crate::core_modules::motion_classifier::MotionClassifier;
use crate::core_modules::preroll_buffer::PrerollBuffer;
use crate::error::{MotionError, MotionResult};
use chrono::Local;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::episode::Episode;

/// Why a run ended.
#[derive(Debug)]
pub enum Termination {
    /// The source ran out of frames.
    EndOfStream,
    /// A fatal condition stopped the run early.
    Aborted(MotionError),
}

/// Everything a run produced, returned even when the run was aborted.
#[derive(Debug)]
pub struct RunReport {
    pub run_log: RunLog,
    pub frames_processed: u64,
    /// Frames dropped from the pre-roll buffer before any writer saved them.
    pub frames_evicted: u64,
    /// Clips that were written and finalized.
    pub clips: Vec<ClipSummary>,
    /// Writers that failed, with the clip they were writing.
    pub writer_failures: Vec<(PathBuf, MotionError)>,
    /// Start of an episode that was still open when the run ended. Never logged.
    pub open_episode_start: Option<u64>,
    pub termination: Termination,
}

impl RunReport {
    pub fn is_aborted(&self) -> bool {
        matches!(self.termination, Termination::Aborted(_))
    }
}

/// The active writer plus the one that was last told to stop.
#[derive(Default)]
struct WriterSlots {
    active: Option<ClipWriterHandle>,
    retiring: Option<ClipWriterHandle>,
    clips: Vec<ClipSummary>,
    failures: Vec<(PathBuf, MotionError)>,
}

impl WriterSlots {
    /// Waits for the retiring writer, then starts `writer`.
    async fn start(&mut self, writer: ClipWriter) {
        if let Some(previous) = self.active.take() {
            previous.stop();
            self.collect(previous).await;
        }
        if let Some(retiring) = self.retiring.take() {
            self.collect(retiring).await;
        }
        self.active = Some(writer.spawn());
    }

    /// Signals the active writer and moves it to the retiring slot.
    async fn retire_active(&mut self) {
        let Some(handle) = self.active.take() else {
            return;
        };
        handle.stop();
        if let Some(older) = self.retiring.replace(handle) {
            self.collect(older).await;
        }
    }

    async fn finish_all(&mut self) {
        if let Some(retiring) = self.retiring.take() {
            self.collect(retiring).await;
        }
        if let Some(active) = self.active.take() {
            self.collect(active).await;
        }
    }

    async fn collect(&mut self, handle: ClipWriterHandle) {
        let path = handle.path().to_path_buf();
        match handle.finish().await {
            Ok(summary) => self.clips.push(summary),
            Err(error) => {
                warn!(path = %path.display(), %error, "Clip writer failed.");
                self.failures.push((path, error));
            }
        }
    }
}

/// State accumulated by the ingestion loop, kept even when it bails out.
#[derive(Default)]
struct RunProgress {
    run_log: RunLog,
    writers: WriterSlots,
    frames_processed: u64,
    frames_evicted: u64,
    open_episode_start: Option<u64>,
}

/// The main, top-level struct of the recorder.
pub struct MotionPipeline {
    config: MotionConfig,
    encoder: Arc<dyn EncoderFactory>,
    masker: Option<Box<dyn ForegroundMasker>>,
}

impl MotionPipeline {
    pub fn new(config: MotionConfig) -> Self {
        let encoder = Arc::new(FfmpegEncoderFactory::new(config.encoder.clone()));
        Self {
            config,
            encoder,
            masker: None,
        }
    }

    /// Replaces the ffmpeg encoder.
    pub fn with_encoder(mut self, encoder: Arc<dyn EncoderFactory>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Replaces the background model selected by `config.algorithm`.
    pub fn with_masker(mut self, masker: Box<dyn ForegroundMasker>) -> Self {
        self.masker = Some(masker);
        self
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// Consumes `source` to its end (or until a fatal error) and reports.
    pub async fn run<S: FrameSource + ?Sized>(self, source: &mut S) -> RunReport {
        let fps = source.fps();
        info!(fps, "FPS: {fps}");

        let mut progress = RunProgress::default();
        let termination = match self.ingest(source, fps, &mut progress).await {
            Ok(()) => Termination::EndOfStream,
            Err(error) => {
                error!(%error, "Run aborted.");
                Termination::Aborted(error)
            }
        };

        let RunProgress {
            run_log,
            mut writers,
            frames_processed,
            frames_evicted,
            open_episode_start,
        } = progress;
        writers.finish_all().await;
        info!(
            frames = frames_processed,
            episodes = run_log.len(),
            clips = writers.clips.len(),
            failures = writers.failures.len(),
            "Run finished."
        );

        RunReport {
            run_log,
            frames_processed,
            frames_evicted,
            clips: writers.clips,
            writer_failures: writers.failures,
            open_episode_start,
            termination,
        }
    }

    async fn ingest<S: FrameSource + ?Sized>(
        self,
        source: &mut S,
        fps: f64,
        progress: &mut RunProgress,
    ) -> MotionResult<()> {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(MotionError::InvalidFrameRate(fps));
        }
        if let Some(first_clip) = source.next_clip() {
            progress.run_log.register_clip(&first_clip);
        }

        let Self {
            config,
            encoder,
            masker,
        } = self;

        let thresholds = EpisodeThresholds::from_config(&config, fps);
        debug!(?thresholds, "episode thresholds");
        let buffer = Arc::new(PrerollBuffer::new(thresholds.buffer_capacity));
        let masker = masker.unwrap_or_else(|| masker_for(&config, fps));
        let mut classifier = MotionClassifier::new(&config, masker, thresholds.warm_up_frames);
        let mut machine = EpisodeStateMachine::new(thresholds, config.save_video);
        let mut namer = ClipNamer::new(config.output_folder.clone(), config.resolved_source_id());

        let outcome = loop {
            let Some(item) = source.next_item() else {
                break Ok(());
            };

            // --- 1. Liveness ---
            if !config.output_folder.is_dir() {
                break Err(MotionError::OutputFolderUnavailable(config.output_folder.clone()));
            }

            // --- 2. Decode ---
            let item = match item {
                Ok(item) => item,
                Err(error) => break Err(error),
            };
            let clip = item.clip;
            let image = match item.payload.resolve() {
                Ok(image) => image,
                Err(error) => break Err(error),
            };

            // --- 3. Classify & buffer ---
            let frame = Frame::new(machine.frame_index(), image);
            let resolution = frame.resolution();
            let has_motion = classifier.has_motion(frame.image());
            buffer.push(frame);
            progress.frames_processed += 1;

            // --- 4. Episode lifecycle ---
            match machine.step(has_motion) {
                Transition::Started { start_frame_index } => {
                    info!(frame = start_frame_index, clip = %clip, "Motion detected.");
                    if config.save_video {
                        let path = namer.next_path(Local::now());
                        let writer = ClipWriter::new(path, fps, resolution, Arc::clone(&buffer), Arc::clone(&encoder));
                        progress.writers.start(writer).await;
                    }
                }
                Transition::Split { frame_index, .. } => {
                    info!(frame = frame_index, "Max clip length exceeded. Motion stopped.");
                    progress.writers.retire_active().await;
                }
                Transition::Closed { episode, stop_writer } => {
                    info!(
                        start = episode.start_frame_index,
                        end = episode.end_frame_index,
                        clip = %clip,
                        "Delay exceeded. Motion stopped."
                    );
                    progress.run_log.record(&clip, episode);
                    if stop_writer {
                        progress.writers.retire_active().await;
                    }
                }
                Transition::Idle | Transition::Continued | Transition::Tolerated { .. } => {}
            }
        };

        progress.frames_evicted = buffer.evicted_count();
        if let EpisodeState::Recording { start_frame_index } = machine.state() {
            debug!(start = start_frame_index, "episode still open at end of run");
            progress.open_episode_start = Some(start_frame_index);
        }
        outcome
    }
}
