//! detect - run object detection on an image or a video file

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::ProgressBar;
use image::RgbImage;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;

use ondevice_ai::config::AppConfig;
use ondevice_ai::detect::{
    AssetDetectorFactory, Delegate, DetectorEvent, DetectorFactory, DetectorOptions, ModelVariant,
    ObjectDetectionHelper, ResultBundle, RunningMode, StubFactory,
};
use ondevice_ai::ui::{Ui, UiMode};
use ondevice_ai::video::VideoSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Model files from the models directory.
    Asset,
    /// Deterministic placeholder detections.
    Stub,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to run detection on.
    #[arg(long, conflicts_with = "video", required_unless_present = "video")]
    image: Option<PathBuf>,
    /// Video file to sample.
    #[arg(long)]
    video: Option<PathBuf>,
    /// Sampling interval for video, in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,
    #[arg(long)]
    threshold: Option<f32>,
    #[arg(long)]
    max_results: Option<u32>,
    /// cpu or gpu.
    #[arg(long)]
    delegate: Option<Delegate>,
    /// lite0, lite1 or lite2.
    #[arg(long)]
    model: Option<ModelVariant>,
    #[arg(long)]
    models_dir: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "asset")]
    backend: Backend,
    /// Print the result bundle as JSON.
    #[arg(long)]
    json: bool,
    #[arg(long, value_enum, default_value = "auto", value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());

    let mut cfg = {
        let _stage = ui.stage("load configuration");
        AppConfig::load()?
    };
    if let Some(dir) = &args.models_dir {
        cfg.detection.models_dir = dir.clone();
    }
    let interval_ms = args.interval_ms.unwrap_or(cfg.detection.video_interval_ms);

    let running_mode = if args.video.is_some() {
        RunningMode::Video
    } else {
        RunningMode::Image
    };
    let mut options = cfg.detection.detector_options(running_mode);
    if let Some(threshold) = args.threshold {
        options = options.with_threshold(threshold);
    }
    if let Some(max_results) = args.max_results {
        options = options.with_max_results(max_results);
    }
    if let Some(delegate) = args.delegate {
        options = options.with_delegate(delegate);
    }
    if let Some(model) = args.model {
        options = options.with_model(model);
    }

    let factory: Arc<dyn DetectorFactory> = match args.backend {
        Backend::Asset => Arc::new(AssetDetectorFactory::new(&cfg.detection.models_dir)),
        Backend::Stub => Arc::new(StubFactory::new()),
    };
    let (events, errors) = mpsc::channel();
    let mut helper = {
        let _stage = ui.stage("build detector");
        ObjectDetectionHelper::new(options, factory, Some(events))
    };
    if !helper.is_ready() {
        return Err(first_error(&errors, "object detector unavailable"));
    }

    let bundle = match (&args.image, &args.video) {
        (Some(path), _) => {
            let image = load_image(path)?;
            let _stage = ui.stage("detect image");
            helper.detect_image(&image)
        }
        (None, Some(path)) => {
            let mut source = open_video(path)?;
            let frames = source.duration_ms()?.map(|d| d / interval_ms.max(1) + 1).unwrap_or(0);
            let mut tracked = Tracked {
                inner: source,
                bar: ui.progress(frames, "sampling video"),
            };
            let bundle = helper.detect_video(&mut tracked, interval_ms);
            tracked.bar.finish_and_clear();
            bundle
        }
        (None, None) => return Err(anyhow!("either --image or --video is required")),
    };

    let Some(bundle) = bundle else {
        return Err(first_error(&errors, "detection produced no result"));
    };
    print_bundle(&bundle, &options, args.json)
}

fn load_image(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(image.to_rgb8())
}

#[cfg(feature = "video-ffmpeg")]
fn open_video(path: &Path) -> Result<Box<dyn VideoSource>> {
    let path = path
        .to_str()
        .ok_or_else(|| anyhow!("video path is not valid UTF-8"))?;
    Ok(Box::new(ondevice_ai::video::FfmpegVideoSource::open(path)?))
}

#[cfg(not(feature = "video-ffmpeg"))]
fn open_video(path: &Path) -> Result<Box<dyn VideoSource>> {
    Err(anyhow!(
        "cannot read {}: built without the video-ffmpeg feature",
        path.display()
    ))
}

/// Advances the progress bar once per sampled frame.
struct Tracked {
    inner: Box<dyn VideoSource>,
    bar: ProgressBar,
}

impl VideoSource for Tracked {
    fn duration_ms(&mut self) -> Result<Option<u64>> {
        self.inner.duration_ms()
    }

    fn frame_at(&mut self, timestamp_ms: u64) -> Result<Option<RgbImage>> {
        let frame = self.inner.frame_at(timestamp_ms);
        self.bar.inc(1);
        frame
    }
}

fn first_error(errors: &mpsc::Receiver<DetectorEvent>, fallback: &str) -> anyhow::Error {
    let messages: Vec<String> = errors
        .try_iter()
        .filter_map(|event| event.err())
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        anyhow!("{}", fallback)
    } else {
        anyhow!("{}", messages.join("; "))
    }
}

fn print_bundle(bundle: &ResultBundle, options: &DetectorOptions, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(bundle)?);
        return Ok(());
    }
    println!(
        "{} on {} | {}x{} | {} ms per frame",
        options.model.display_name(),
        options.delegate,
        bundle.input_image_width,
        bundle.input_image_height,
        bundle.inference_time_ms
    );
    for frame in &bundle.results {
        if bundle.results.len() > 1 {
            println!("@{} ms", frame.timestamp_ms);
        }
        if frame.detections.is_empty() {
            println!("  (no detections)");
        }
        for detection in &frame.detections {
            let b = &detection.bounding_box;
            println!(
                "  {:<24} [{:.0}, {:.0}, {:.0}, {:.0}]",
                detection.label(),
                b.left,
                b.top,
                b.right(),
                b.bottom()
            );
        }
    }
    Ok(())
}
