use anyhow::{bail, Context};
use clap::Parser;
use opencv::{
    core::Size,
    highgui,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cmtrack::opencv_backend::{mat_to_frame, BriskConfig, BriskFeatures, LucasKanadeConfig, LucasKanadeFlow};
use cmtrack::{visualization, CmtTracker, FrameResult, Rect, TrackerConfig};

const WINDOW_NAME: &str = "cmtrack";

#[derive(Parser)]
#[command(
    name = "cmtrack",
    about = "Track an object through a video with consensus-based keypoint matching",
    version
)]
struct Args {
    /// Path to the input video
    #[arg(short, long)]
    input: PathBuf,

    /// Initial region of interest as x,y,width,height
    #[arg(short, long, value_parser = parse_roi)]
    roi: Rect,

    /// Path to a JSON tracker configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Estimate in-plane rotation
    #[arg(long)]
    estimate_rotation: bool,

    /// Keep the scale fixed at 1
    #[arg(long)]
    no_estimate_scale: bool,

    /// Where to write the per-frame tracking log
    #[arg(short, long, default_value = "tracking_details.json")]
    log: PathBuf,

    /// Show the tracking result in a window
    #[arg(short, long)]
    visualize: bool,

    /// Write an annotated video (mp4)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn parse_roi(s: &str) -> Result<Rect, String> {
    let values: Vec<f32> = s
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("{v:?}: {e}")))
        .collect::<Result<_, _>>()?;
    match values.as_slice() {
        [x, y, w, h] => Ok(Rect::new(*x, *y, *w, *h)),
        _ => Err(format!("expected x,y,width,height, got {} values", values.len())),
    }
}

#[derive(Serialize, Debug, Clone)]
struct FrameLog {
    frame_id: usize,
    valid: bool,
    bounding_box: Option<[i32; 4]>,
    center: Option<[f32; 2]>,
    scale: Option<f32>,
    rotation: Option<f32>,
    active_keypoints: usize,
}

impl FrameLog {
    fn new(frame_id: usize, result: &FrameResult, active_keypoints: usize) -> Self {
        Self {
            frame_id,
            valid: result.valid,
            bounding_box: result.bounding_box.map(|r| r.to_pixel_rect()),
            center: result.center.map(|c| [c.x, c.y]),
            scale: result.scale,
            rotation: result.rotation,
            active_keypoints,
        }
    }
}

fn write_log(path: &PathBuf, log: &[FrameLog]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(log)?;
    let mut file = File::create(path).with_context(|| format!("creating {path:?}"))?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_file(path).with_context(|| format!("loading {path:?}"))?,
        None => TrackerConfig::default(),
    };
    if args.estimate_rotation {
        config.estimate_rotation = true;
    }
    if args.no_estimate_scale {
        config.estimate_scale = false;
    }
    info!(?config, "tracker configuration");

    let mut tracker = CmtTracker::new(
        Box::new(BriskFeatures::new(BriskConfig::default())?),
        Box::new(BriskFeatures::new(BriskConfig::default())?),
        Box::new(LucasKanadeFlow::new(LucasKanadeConfig::default())?),
        config,
    )?;

    let mut cap = VideoCapture::from_file(&args.input.to_string_lossy(), videoio::CAP_ANY)?;
    if !cap.is_opened()? {
        bail!("failed to open video file {:?}", args.input);
    }
    let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
    let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
    let total_frames = cap.get(videoio::CAP_PROP_FRAME_COUNT)? as i32;
    let fps = cap.get(videoio::CAP_PROP_FPS)?;
    info!(width, height, total_frames, fps, "opened {:?}", args.input);

    let mut writer = match &args.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let fourcc = VideoWriter::fourcc('a', 'v', 'c', '1')?;
            let writer = VideoWriter::new(
                &path.to_string_lossy(),
                fourcc,
                if fps > 0.0 { fps } else { 30.0 },
                Size::new(width, height),
                true,
            )?;
            if !writer.is_opened()? {
                bail!("failed to open video writer {path:?}");
            }
            Some(writer)
        }
        None => None,
    };

    if args.visualize {
        highgui::named_window(WINDOW_NAME, highgui::WINDOW_NORMAL)?;
        highgui::resize_window(WINDOW_NAME, width, height)?;
    }

    let mut log = Vec::new();
    let mut image = Mat::default();
    let mut frame_id = 0usize;
    let mut lost_frames = 0usize;
    let started = Instant::now();

    while cap.read(&mut image)? {
        if image.empty() {
            break;
        }
        let frame = mat_to_frame(&image)?;

        let result = match tracker.process_frame(frame, args.roi) {
            Ok(result) => result,
            Err(e) if !tracker.is_initialized() => {
                return Err(e).context("initializing tracker on the first frame");
            }
            Err(e) => {
                // The tracker keeps its previous state; try again on the next frame.
                warn!(frame_id, error = %e, "frame skipped");
                frame_id += 1;
                continue;
            }
        };
        if !result.valid {
            lost_frames += 1;
        }
        log.push(FrameLog::new(frame_id, &result, tracker.active_keypoints().len()));

        if args.visualize || writer.is_some() {
            let mut output = image.try_clone()?;
            let elapsed = started.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 { (frame_id + 1) as f64 / elapsed } else { 0.0 };
            visualization::draw_tracking_result(&mut output, &tracker, &result)?;
            visualization::draw_frame_info(&mut output, frame_id as i32, rate, &result)?;

            if let Some(writer) = &mut writer {
                writer.write(&output)?;
            }
            if args.visualize {
                highgui::imshow(WINDOW_NAME, &output)?;
                if highgui::wait_key(1)? == 27 {
                    info!("tracking interrupted by user");
                    break;
                }
            }
        }

        frame_id += 1;
        if frame_id % 100 == 0 {
            info!("processed {}/{} frames", frame_id, total_frames);
        }
    }

    write_log(&args.log, &log)?;
    info!(
        frames = frame_id,
        lost = lost_frames,
        "tracking log saved to {:?}",
        args.log
    );
    Ok(())
}
