// THEORY:
// The `episode` module is the behavioral layer of the recorder. It turns the
// per-frame stream of motion decisions into a discrete history of "episodes":
// contiguous intervals of motion that tolerate short gaps in detection.
//
// Key architectural principles:
// 1.  **Hysteresis**: an episode opens on the first motion frame but only closes
//     after `delay_frames` consecutive still frames, so a fish pausing behind a
//     rock does not cut the clip in two.
// 2.  **Bounded clips**: an episode that keeps moving for longer than
//     `max_clip_frames` is force-split. The physical clip rotates, but the split
//     is not a logical close and nothing is logged for it; the next motion frame
//     opens a fresh episode.
// 3.  **Pure decisions**: `EpisodeStateMachine::step` only decides. Starting and
//     stopping writers and recording the log happen in the pipeline, driven by
//     the returned `Transition`. This keeps the timing rules testable without
//     threads or files.

use crate::config::MotionConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Frame-count thresholds derived from a config and the stream's frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeThresholds {
    /// Frames classified as still while the background model settles.
    pub warm_up_frames: u64,
    /// Capacity of the pre-roll buffer.
    pub buffer_capacity: usize,
    /// Consecutive still frames tolerated before an episode closes.
    pub delay_frames: u64,
    /// Frames after which an ongoing clip is force-split.
    pub max_clip_frames: u64,
}

impl EpisodeThresholds {
    pub fn from_config(config: &MotionConfig, fps: f64) -> Self {
        Self {
            warm_up_frames: fps.round() as u64,
            buffer_capacity: (fps * config.buffer_seconds).round() as usize,
            delay_frames: (fps * config.delay_seconds).round() as u64,
            max_clip_frames: (config.max_clip_minutes * 60.0 * fps).round() as u64,
        }
    }
}

/// A closed motion interval. Both ends are inclusive frame indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub start_frame_index: u64,
    pub end_frame_index: u64,
}

/// Closed episodes per clip source. Clips are keyed and listed by name; each
/// clip's episodes stay in the order they were closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunLog {
    clips: BTreeMap<String, Vec<Episode>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure `clip` appears in the log, even if it never records an episode.
    pub fn register_clip(&mut self, clip: &str) {
        if !self.clips.contains_key(clip) {
            self.clips.insert(clip.to_string(), Vec::new());
        }
    }

    pub fn record(&mut self, clip: &str, episode: Episode) {
        self.register_clip(clip);
        if let Some(episodes) = self.clips.get_mut(clip) {
            episodes.push(episode);
        }
    }

    pub fn episodes(&self, clip: &str) -> &[Episode] {
        self.clips.get(clip).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clips(&self) -> impl Iterator<Item = (&str, &[Episode])> {
        self.clips.iter().map(|(name, eps)| (name.as_str(), eps.as_slice()))
    }

    /// Total number of closed episodes across all clips.
    pub fn len(&self) -> usize {
        self.clips.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(start, end)` pairs per clip, the shape callers persist.
    pub fn to_pairs(&self) -> BTreeMap<String, Vec<(u64, u64)>> {
        self.clips
            .iter()
            .map(|(name, eps)| {
                let pairs = eps
                    .iter()
                    .map(|e| (e.start_frame_index, e.end_frame_index))
                    .collect();
                (name.clone(), pairs)
            })
            .collect()
    }
}

/// Whether an episode is currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeState {
    Idle,
    Recording { start_frame_index: u64 },
}

/// What a single frame did to the episode lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Still idle, or inside the delay tail of an already closed episode.
    Idle,
    /// A new episode opened on this frame. A writer should start if recording.
    Started { start_frame_index: u64 },
    /// Motion continued an open episode.
    Continued,
    /// A still frame inside an open episode; `gap` consecutive still frames so far.
    Tolerated { gap: u64 },
    /// The clip grew past the maximum length. The writer must stop; nothing is logged.
    Split { start_frame_index: u64, frame_index: u64 },
    /// The delay elapsed. The episode must be logged and the writer, if any, stopped.
    Closed { episode: Episode, stop_writer: bool },
}

/// Per-frame episode decisions for one camera source.
#[derive(Debug, Clone)]
pub struct EpisodeStateMachine {
    thresholds: EpisodeThresholds,
    recording_enabled: bool,
    state: EpisodeState,
    frame_index: u64,
    frames_since_start: u64,
    still_frames: u64,
    writer_live: bool,
}

impl EpisodeStateMachine {
    pub fn new(thresholds: EpisodeThresholds, recording_enabled: bool) -> Self {
        Self {
            thresholds,
            recording_enabled,
            state: EpisodeState::Idle,
            frame_index: 0,
            frames_since_start: 0,
            still_frames: 0,
            writer_live: false,
        }
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    /// Index the next processed frame will receive.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn thresholds(&self) -> EpisodeThresholds {
        self.thresholds
    }

    /// Advances the lifecycle by one frame.
    pub fn step(&mut self, has_motion: bool) -> Transition {
        let current = self.frame_index;
        self.frames_since_start += 1;

        let transition = if has_motion {
            self.still_frames = 0;
            match self.state {
                EpisodeState::Idle => {
                    self.state = EpisodeState::Recording {
                        start_frame_index: current,
                    };
                    self.frames_since_start = 0;
                    self.writer_live = self.recording_enabled;
                    Transition::Started {
                        start_frame_index: current,
                    }
                }
                EpisodeState::Recording { start_frame_index } => {
                    if self.writer_live && self.frames_since_start > self.thresholds.max_clip_frames {
                        // The still-frame counter is left as is; the next motion
                        // frame re-opens without another warm-up.
                        self.writer_live = false;
                        self.state = EpisodeState::Idle;
                        Transition::Split {
                            start_frame_index,
                            frame_index: current,
                        }
                    } else {
                        Transition::Continued
                    }
                }
            }
        } else if self.still_frames < self.thresholds.delay_frames {
            self.still_frames += 1;
            match self.state {
                EpisodeState::Recording { .. } => Transition::Tolerated {
                    gap: self.still_frames,
                },
                EpisodeState::Idle => Transition::Idle,
            }
        } else {
            match self.state {
                EpisodeState::Recording { start_frame_index } => {
                    self.frames_since_start = 0;
                    self.state = EpisodeState::Idle;
                    let stop_writer = std::mem::replace(&mut self.writer_live, false);
                    Transition::Closed {
                        episode: Episode {
                            start_frame_index,
                            end_frame_index: current,
                        },
                        stop_writer,
                    }
                }
                EpisodeState::Idle => Transition::Idle,
            }
        };

        self.frame_index += 1;
        transition
    }
}
