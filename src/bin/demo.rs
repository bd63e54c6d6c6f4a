//! demo - synthetic end-to-end run of live detection, overlay mapping and a chat turn

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use ondevice_ai::chat::{ChatSession, GenerationConfig, InferenceModel, ScriptedGenerator};
use ondevice_ai::detect::{DetectorOptions, ObjectDetectionHelper, RunningMode, StubFactory};
use ondevice_ai::frame::{CameraFrame, PixelFormat};
use ondevice_ai::overlay::{OverlayMapper, Size};
use ondevice_ai::ui::{Ui, UiMode};

const DEMO_REPLIES: [&str; 3] = [
    "Hi there! I am running entirely on this device.",
    "Detection and chat share nothing but the process.",
    "Ask me anything; I only know a few canned lines.",
];

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Synthetic camera frames to submit.
    #[arg(long, default_value_t = 10)]
    frames: u32,
    /// Frames per second for the synthetic camera.
    #[arg(long, default_value_t = 15)]
    fps: u32,
    #[arg(long, default_value_t = 640)]
    width: u32,
    #[arg(long, default_value_t = 480)]
    height: u32,
    /// Clockwise sensor rotation applied to every frame.
    #[arg(long, default_value_t = 90)]
    rotation: u32,
    /// Display area the preview is fitted into, WIDTHxHEIGHT.
    #[arg(long, default_value = "360x640")]
    container: String,
    /// Message sent to the model.
    #[arg(long, default_value = "hello")]
    prompt: String,
    /// Pause between streamed chunks.
    #[arg(long, default_value_t = 40)]
    chunk_delay_ms: u64,
    /// Output directory for the transcript and placeholder model file.
    #[arg(long, default_value = "demo_out")]
    out: String,
    #[arg(long, value_enum, default_value = "auto", value_name = "MODE")]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    let container = parse_container(&args.container)?;
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());

    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)?;

    run_live_detection(&args, container, &ui)?;
    run_chat_turn(&args, &out_dir, &ui)?;
    Ok(())
}

fn parse_container(value: &str) -> Result<Size> {
    let (w, h) = value
        .split_once('x')
        .ok_or_else(|| anyhow!("container must look like WIDTHxHEIGHT"))?;
    let width: f32 = w.trim().parse().context("container width")?;
    let height: f32 = h.trim().parse().context("container height")?;
    Ok(Size::new(width, height))
}

fn run_live_detection(args: &Args, container: Size, ui: &Ui) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let options = DetectorOptions::default().with_running_mode(RunningMode::LiveStream);

    {
        let _stage = ui.stage("stream synthetic camera");
        let helper = ObjectDetectionHelper::new(options, Arc::new(StubFactory::new()), Some(tx));
        if !helper.is_ready() {
            return Err(anyhow!("live detector failed to start"));
        }
        let bar = ui.progress(args.frames as u64, "frames");
        let period = Duration::from_millis(1000 / args.fps as u64);
        for i in 0..args.frames {
            helper.detect_live_stream_frame(synthetic_frame(args, i));
            bar.inc(1);
            std::thread::sleep(period);
        }
        bar.finish_and_clear();
        // Dropping the helper drains the queue and stops the worker.
    }

    // Boxes are mapped as the camera requested them until results report the
    // rotated frame size.
    let mut mapper = OverlayMapper::new(container, args.width, args.height);
    let mut delivered = 0;
    for event in rx.try_iter() {
        let bundle = match event {
            Ok(bundle) => bundle,
            Err(err) => {
                log::warn!("live detection error: {}", err);
                continue;
            }
        };
        delivered += 1;
        let rects = mapper.map_bundle(&bundle);
        let preview = mapper.preview_size();
        println!(
            "frame {}x{} -> preview {:.0}x{:.0} | {} ms | {} boxes",
            bundle.input_image_width,
            bundle.input_image_height,
            preview.width,
            preview.height,
            bundle.inference_time_ms,
            rects.len()
        );
        for rect in rects {
            println!(
                "  {:<16} at ({:.0}, {:.0}) size {:.0}x{:.0}",
                rect.label, rect.left, rect.top, rect.width, rect.height
            );
        }
    }
    println!("{} of {} frames produced results", delivered, args.frames);
    Ok(())
}

/// Gradient that shifts each frame so detections differ.
fn synthetic_frame(args: &Args, index: u32) -> CameraFrame {
    let (width, height) = (args.width, args.height);
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let shift = index.wrapping_mul(17);
            pixels.push(((x + shift) % 256) as u8);
            pixels.push(((y + shift) % 256) as u8);
            pixels.push(((x ^ y) % 256) as u8);
            pixels.push(255);
        }
    }
    CameraFrame::new(pixels, width, height, PixelFormat::Rgba8888).with_rotation(args.rotation)
}

fn run_chat_turn(args: &Args, out_dir: &std::path::Path, ui: &Ui) -> Result<()> {
    // The scripted generator needs no weights, but the model path is still
    // checked like a real one.
    let model_path = out_dir.join("gemma-demo.bin");
    fs::write(&model_path, b"placeholder weights")?;
    let config = GenerationConfig {
        model_path,
        ..GenerationConfig::default()
    };

    let model = {
        let _stage = ui.stage("load language model");
        InferenceModel::open(config, |cfg| {
            Ok(ScriptedGenerator::from_config(cfg, DEMO_REPLIES)?
                .with_delay(Duration::from_millis(args.chunk_delay_ms)))
        })?
    };
    let model = Arc::new(model);
    let session = ChatSession::new(model.clone());

    {
        let _stage = ui.stage("chat turn");
        let turn = session.send_message(args.prompt.trim())?;
        turn.join().map_err(|_| anyhow!("chat turn panicked"))?;
    }

    let transcript = session.transcript().read_transcript();
    for message in transcript.iter().rev() {
        println!("{:>5}: {}", message.author.as_str(), message.text);
    }
    let path = out_dir.join("transcript.json");
    fs::write(&path, serde_json::to_vec_pretty(&transcript)?)?;
    println!("transcript written to {}", path.display());

    drop(session);
    if let Ok(model) = Arc::try_unwrap(model) {
        model.close();
    }
    Ok(())
}
