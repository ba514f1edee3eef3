use anyhow::{Context, Result, bail};
use clap::Parser;
use motion_clip::{
    Algorithm, FrameSource, ImageSequenceSource, MotionConfig, MotionPipeline, RunReport, Termination,
    VideoFileSource,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[cfg(feature = "opencv")]
mod opencv_source;

/// Record motion clips from video files or image folders.
#[derive(Parser, Debug)]
#[command(name = "clip_recorder", version, about)]
struct Args {
    /// Video files (one clip each), or a single folder of images. Sub-folders of
    /// an image folder become separate clips.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Folder receiving the recorded clips.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON configuration file. Flags override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frame rate of the stream. Required for image folders.
    #[arg(long)]
    fps: Option<f64>,

    /// Background model: MOG2 or CNT.
    #[arg(long)]
    algorithm: Option<Algorithm>,

    /// Log episodes without writing any clip.
    #[arg(long)]
    no_save_video: bool,

    /// Prefix of the clip file names. Defaults to the host name.
    #[arg(long)]
    source_id: Option<String>,

    /// Where to write the Run Log as JSON.
    #[arg(long)]
    run_log: Option<PathBuf>,

    /// Decode inputs with OpenCV instead of ffmpeg. Numeric inputs open capture devices.
    #[cfg(feature = "opencv")]
    #[arg(long)]
    opencv: bool,
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(false))
            .with(env_filter)
            .init();
    }
}

fn load_config(args: &Args) -> Result<MotionConfig> {
    let mut config = match &args.config {
        Some(path) => MotionConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => MotionConfig::default(),
    };
    if let Some(output) = &args.output {
        config.output_folder = output.clone();
    }
    if let Some(algorithm) = args.algorithm {
        config.algorithm = algorithm;
    }
    if args.no_save_video {
        config.save_video = false;
    }
    if let Some(source_id) = &args.source_id {
        config.source_id = Some(source_id.clone());
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_source(args: &Args) -> Result<Box<dyn FrameSource>> {
    #[cfg(feature = "opencv")]
    if args.opencv {
        let inputs = args.inputs.iter().map(|p| p.display().to_string()).collect();
        return Ok(Box::new(opencv_source::OpenCvSource::open(inputs, args.fps)?));
    }

    if let [single] = args.inputs.as_slice() {
        if single.is_dir() {
            let Some(fps) = args.fps else {
                bail!("--fps is required when reading an image folder");
            };
            return Ok(Box::new(ImageSequenceSource::open(single, fps)?));
        }
    }

    let files = args.inputs.clone();
    let source = match args.fps {
        Some(fps) => VideoFileSource::open_with_fps(files, fps)?,
        None => VideoFileSource::open(files)?,
    };
    Ok(Box::new(source))
}

fn write_run_log(report: &RunReport, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, &report.run_log.to_pairs())
        .with_context(|| format!("failed to write run log to {}", path.display()))?;
    info!(path = %path.display(), "Run log written.");
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("Frames processed: {}", report.frames_processed);
    println!("Frames evicted:   {}", report.frames_evicted);
    for (clip, episodes) in report.run_log.clips() {
        println!("{clip}:");
        for episode in episodes {
            println!("  {} -> {}", episode.start_frame_index, episode.end_frame_index);
        }
    }
    for summary in &report.clips {
        println!(
            "Saved {} ({} frames, {} pre-roll)",
            summary.path.display(),
            summary.total_frames(),
            summary.preroll_frames
        );
    }
    if let Some(start) = report.open_episode_start {
        println!("Episode starting at frame {start} was still open at the end.");
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();

    // --- 1. Argument Parsing & Setup ---
    let args = Args::parse();
    let config = load_config(&args)?;
    if !config.output_folder.is_dir() {
        bail!("output folder {} does not exist", config.output_folder.display());
    }
    info!(
        algorithm = ?config.algorithm,
        save_video = config.save_video,
        output = %config.output_folder.display(),
        "Starting clip_recorder"
    );

    // --- 2. Source ---
    let mut source = open_source(&args)?;

    // --- 3. Run ---
    let report = MotionPipeline::new(config).run(source.as_mut()).await;

    // --- 4. Results ---
    // The log is written even for an aborted run; it holds everything closed so far.
    if let Some(path) = &args.run_log {
        write_run_log(&report, path)?;
    }
    print_summary(&report);
    for (path, failure) in &report.writer_failures {
        warn!(path = %path.display(), %failure, "Clip was not saved.");
    }

    match &report.termination {
        Termination::EndOfStream => Ok(ExitCode::SUCCESS),
        Termination::Aborted(cause) => {
            error!(%cause, "Recording aborted.");
            Ok(ExitCode::FAILURE)
        }
    }
}
