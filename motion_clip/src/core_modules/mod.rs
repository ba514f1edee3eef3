pub mod background_model;
pub mod blob_detector;
pub mod clip_writer;
pub mod encoder;
pub mod episode;
pub mod frame;
pub mod frame_source;
pub mod morphology;
pub mod motion_classifier;
pub mod preroll_buffer;
