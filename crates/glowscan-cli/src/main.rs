use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use glowscan_core::{
    analyze_frame, Analysis, BrightnessClassifier, CascadeDetector, DetectorParams, HaarCascade,
    Thresholds,
};
use glowscan_hw::Camera;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CASCADE: &str = "/usr/share/opencv4/haarcascades/haarcascade_frontalface_default.xml";

#[derive(Parser, Debug)]
#[command(name = "glowscan", about = "GlowScan skin-condition scanner CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Capture one frame from the camera and analyse it
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Frames to discard while auto-exposure settles
        #[arg(long, default_value_t = 4)]
        warmup: usize,
        #[command(flatten)]
        detection: DetectionArgs,
        /// Save the annotated frame to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Analyse an image file offline
    Classify {
        image: PathBuf,
        #[command(flatten)]
        detection: DetectionArgs,
        /// Save the annotated image to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show daemon status
    Status {
        #[arg(long, default_value = "http://127.0.0.1:5000")]
        url: String,
    },
}

#[derive(clap::Args, Debug)]
struct DetectionArgs {
    /// OpenCV Haar cascade XML
    #[arg(long, default_value = DEFAULT_CASCADE)]
    cascade: PathBuf,
    #[arg(long, default_value_t = glowscan_core::detector::DEFAULT_SCALE_FACTOR)]
    scale_factor: f64,
    #[arg(long, default_value_t = glowscan_core::detector::DEFAULT_MIN_NEIGHBORS)]
    min_neighbors: u32,
}

impl DetectionArgs {
    fn detector(&self) -> Result<CascadeDetector> {
        let cascade = HaarCascade::load(&self.cascade)
            .with_context(|| format!("failed to load cascade {}", self.cascade.display()))?;
        let params = DetectorParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            ..DetectorParams::default()
        };
        Ok(CascadeDetector::new(Arc::new(cascade), params)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Test {
            device,
            warmup,
            detection,
            output,
        } => {
            println!("Running camera diagnostics on {device}...");
            let detector = detection.detector()?;
            let (analysis, image) =
                tokio::task::spawn_blocking(move || capture_and_analyze(&device, warmup, &detector))
                    .await
                    .context("camera task panicked")??;
            print_analysis(&analysis);
            if let Some(path) = output {
                save(&image, &path)?;
            }
        }
        Commands::Classify {
            image,
            detection,
            output,
        } => {
            let detector = detection.detector()?;
            let (analysis, annotated) = classify_file(&image, &detector)?;
            print_analysis(&analysis);
            if let Some(path) = output {
                save(&annotated, &path)?;
            }
        }
        Commands::Status { url } => {
            let status = fetch_status(&url).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn capture_and_analyze(
    device: &str,
    warmup: usize,
    detector: &CascadeDetector,
) -> Result<(Analysis, RgbImage)> {
    let mut camera = Camera::open(device)?;
    println!(
        "Opened {} at {}x{} ({:?})",
        camera.device_path,
        camera.width,
        camera.height,
        camera.pixel_format()
    );
    let dark = camera.discard_frames(warmup);
    if dark > 0 {
        println!("Skipped {dark} dark frames during warmup");
    }
    let frame = camera.capture_frame()?;
    if frame.is_dark() {
        println!("Warning: captured frame is mostly dark");
    }
    let image = RgbImage::from_raw(frame.width, frame.height, frame.data)
        .context("frame buffer does not match its dimensions")?;
    analyze(image, detector)
}

fn classify_file(path: &Path, detector: &CascadeDetector) -> Result<(Analysis, RgbImage)> {
    let image = image::open(path)
        .with_context(|| format!("failed to read image {}", path.display()))?
        .to_rgb8();
    analyze(image, detector)
}

fn analyze(mut image: RgbImage, detector: &CascadeDetector) -> Result<(Analysis, RgbImage)> {
    let (width, height) = image.dimensions();
    let classifier = BrightnessClassifier::new(Thresholds::default());
    let analysis = analyze_frame(&mut image, width, height, detector, &classifier)?;
    tracing::debug!(?analysis, "analysis complete");
    Ok((analysis, image))
}

fn print_analysis(analysis: &Analysis) {
    println!("Result:     {}", analysis.label);
    println!("Faces:      {}", analysis.faces_detected);
    if let Some(face) = analysis.face {
        println!(
            "Face box:   {}x{} at ({}, {})",
            face.width, face.height, face.x, face.y
        );
    }
    if let Some(brightness) = analysis.brightness {
        println!("Brightness: {brightness:.1}");
    }
}

fn save(image: &RgbImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Annotated image saved to {}", path.display());
    Ok(())
}

async fn fetch_status(base_url: &str) -> Result<serde_json::Value> {
    let url = format!("{}/status", base_url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("glowscand not reachable at {url}"))?;
    if !response.status().is_success() {
        bail!("glowscand returned {}", response.status());
    }
    Ok(response.json().await?)
}
