// THEORY:
// This file is the main entry point for the `motion_clip` library crate. It
// defines the public API used by the `clip_recorder` binary and by any other
// host that wants motion-triggered recording of a camera stream.
//
// The primary interface is `MotionPipeline`: hand it a `MotionConfig` and a
// `FrameSource`, await `run`, and get back a `RunReport` holding the Run Log of
// closed motion episodes per clip. The building blocks in `core_modules` stay
// public so hosts can swap the background model or the encoder, and so each
// stage can be exercised on its own.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;

pub use config::{Algorithm, EncoderSettings, MotionConfig};
pub use core_modules::episode::{Episode, RunLog};
pub use core_modules::frame_source::{FrameSource, ImageSequenceSource, VideoFileSource};
pub use error::{MotionError, MotionResult};
pub use pipeline::{MotionPipeline, RunReport, Termination};
