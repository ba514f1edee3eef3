// THEORY:
// A `ClipWriter` is the consumer half of the recorder. One is spawned per
// episode and runs on the blocking thread pool next to the ingestion loop, which
// keeps appending frames to the shared `PrerollBuffer`.
//
// Lifecycle:
// 1.  **DrainingPreroll**: the frames that were already buffered when the writer
//     started are popped and encoded first. They are the footage from just
//     before motion was recognized.
// 2.  **Live**: the writer waits on the buffer's condition variable for new
//     frames and encodes them as they arrive. Once its stop signal is raised it
//     still takes every frame pushed before the stop, then leaves this phase.
//     Frames pushed after the stop are left for the next writer's pre-roll.
// 3.  **Stopped**: the encoder is finished exactly once, whether the loop ended
//     normally or because a write failed.
//
// The writer never validates the output folder; that liveness check belongs to
// the ingestion loop. Encoder failures end this writer only. They surface
// through its `ClipWriterHandle` and leave the shared buffer untouched.

use crate::core_modules::encoder::{ClipEncoder, EncoderFactory};
use crate::core_modules::frame::Frame;
use crate::core_modules::preroll_buffer::{PrerollBuffer, StopSignal};
use crate::error::{MotionError, MotionResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PROGRESS_LOG_INTERVAL: u64 = 20;

/// Where the writer currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterPhase {
    DrainingPreroll,
    Live,
    Stopped,
}

/// What a finished writer produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipSummary {
    pub path: PathBuf,
    /// Frames taken from the pre-roll present at writer start.
    pub preroll_frames: u64,
    /// Frames consumed after the pre-roll was drained.
    pub live_frames: u64,
    pub first_frame_index: Option<u64>,
    pub last_frame_index: Option<u64>,
}

impl ClipSummary {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            preroll_frames: 0,
            live_frames: 0,
            first_frame_index: None,
            last_frame_index: None,
        }
    }

    pub fn total_frames(&self) -> u64 {
        self.preroll_frames + self.live_frames
    }

    fn note(&mut self, frame: &Frame) {
        self.first_frame_index.get_or_insert(frame.index);
        self.last_frame_index = Some(frame.index);
    }
}

/// A clip writer that has been configured but not started.
pub struct ClipWriter {
    path: PathBuf,
    fps: f64,
    resolution: (u32, u32),
    buffer: Arc<PrerollBuffer>,
    stop: Arc<StopSignal>,
    factory: Arc<dyn EncoderFactory>,
}

impl ClipWriter {
    pub fn new(
        path: PathBuf,
        fps: f64,
        resolution: (u32, u32),
        buffer: Arc<PrerollBuffer>,
        factory: Arc<dyn EncoderFactory>,
    ) -> Self {
        Self {
            path,
            fps,
            resolution,
            buffer,
            stop: Arc::new(StopSignal::new()),
            factory,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Starts the writer on the blocking pool. Must be called from a tokio runtime.
    pub fn spawn(self) -> ClipWriterHandle {
        let path = self.path.clone();
        let stop = Arc::clone(&self.stop);
        let buffer = Arc::clone(&self.buffer);
        let task = tokio::task::spawn_blocking(move || self.run());
        ClipWriterHandle {
            path,
            stop,
            buffer,
            task,
        }
    }

    /// Runs the whole lifecycle on the current thread.
    pub fn run(self) -> MotionResult<ClipSummary> {
        let mut encoder = self.factory.open(&self.path, self.fps, self.resolution)?;
        info!(path = %self.path.display(), "Recording clip.");

        let mut summary = ClipSummary::new(self.path.clone());
        let pumped = self.pump(encoder.as_mut(), &mut summary);
        let finished = encoder.finish();
        debug!(path = %self.path.display(), phase = ?WriterPhase::Stopped, "encoder released");

        pumped?;
        finished?;
        info!(
            path = %self.path.display(),
            preroll = summary.preroll_frames,
            live = summary.live_frames,
            "Clip saved."
        );
        Ok(summary)
    }

    fn pump(
        &self,
        encoder: &mut dyn ClipEncoder,
        summary: &mut ClipSummary,
    ) -> MotionResult<()> {
        // --- DrainingPreroll ---
        let pending = self.buffer.len();
        debug!(path = %self.path.display(), phase = ?WriterPhase::DrainingPreroll, pending, "writer started");
        for _ in 0..pending {
            let Some(frame) = self.buffer.try_pop_for(&self.stop) else {
                break;
            };
            if summary.preroll_frames % PROGRESS_LOG_INTERVAL == 0 {
                debug!(count = summary.preroll_frames, "Saving pre-roll...");
            }
            encoder.write_frame(&frame)?;
            summary.note(&frame);
            summary.preroll_frames += 1;
        }

        // --- Live ---
        debug!(path = %self.path.display(), phase = ?WriterPhase::Live, "pre-roll drained");
        while let Some(frame) = self.buffer.wait_pop(&self.stop) {
            if summary.live_frames % PROGRESS_LOG_INTERVAL == 0 {
                debug!(count = summary.live_frames, "Saving...");
            }
            if let Some(last) = summary.last_frame_index {
                if frame.index > last + 1 {
                    warn!(
                        skipped = frame.index - last - 1,
                        "frames were evicted before the writer could save them"
                    );
                }
            }
            encoder.write_frame(&frame)?;
            summary.note(&frame);
            summary.live_frames += 1;
        }
        Ok(())
    }
}

/// The producer's grip on a running writer.
pub struct ClipWriterHandle {
    path: PathBuf,
    stop: Arc<StopSignal>,
    buffer: Arc<PrerollBuffer>,
    task: JoinHandle<MotionResult<ClipSummary>>,
}

impl ClipWriterHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_raised()
    }

    /// Asks the writer to drain what is buffered and then finish.
    pub fn stop(&self) {
        if !self.stop.is_raised() {
            info!(path = %self.path.display(), "Stopping recording.");
            self.buffer.signal_stop(&self.stop);
        }
    }

    /// Stops the writer if needed and waits for it to release its encoder.
    pub async fn finish(self) -> MotionResult<ClipSummary> {
        self.stop();
        match self.task.await {
            Ok(result) => result,
            Err(join_error) => Err(MotionError::WriterPanicked(join_error.to_string())),
        }
    }
}
