//! Demo pipeline: mixes two synthetic camera feeds on the GPU and records the result
//! with a telemetry overlay and a test tone.
//!
//! Usage: `dualcam [config.json]`

use std::f64::consts::TAU;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dualcam::error::{OptionExt, ResultExt};
use dualcam::{
    logging, AppConfig, AudioBuffer, Compositor, DualCamResult, FfmpegWriterFactory,
    FormatDescription, FrameBuffer, GpuContext, MovieRecorder, OverlayRenderer, PixelFormat,
    SharedTelemetry, Timestamp,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 360;
const DURATION_SECS: u32 = 3;
const SAMPLE_RATE: u32 = 48_000;

fn main() -> ExitCode {
    let config = match std::env::args_os().nth(1) {
        Some(path) => AppConfig::load(Path::new(&path)),
        None => Ok(AppConfig::default()),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(&config) {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        },
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        },
    }
}

fn run(config: &AppConfig) -> DualCamResult<PathBuf> {
    let gpu = Arc::new(pollster::block_on(GpuContext::new())?);
    let mut compositor = Compositor::new(Arc::clone(&gpu), &config.mixer)?;
    let input = FormatDescription::new(WIDTH, HEIGHT, PixelFormat::Bgra8);
    compositor.prepare(&input, config.mixer.retained_buffer_count)?;

    let telemetry = Arc::new(SharedTelemetry::new());
    let recorder = MovieRecorder::new(
        config.recording.clone(),
        FfmpegWriterFactory::new(config.writer.clone())?,
        telemetry.clone(),
        OverlayRenderer::new(config.overlay.clone()),
    );

    let running = Arc::new(AtomicBool::new(true));
    let sensors = spawn_fake_sensors(Arc::clone(&telemetry), Arc::clone(&running));

    let output = recorder.start_recording()?;
    let fps = config.recording.frame_rate();
    let frame_interval = Duration::from_secs_f64(1.0 / fps as f64);
    let samples_per_frame = (SAMPLE_RATE / fps) as usize;
    let started = Instant::now();

    for index in 0..fps * DURATION_SECS {
        let pts = Timestamp::from_secs_f64(index as f64 / fps as f64);
        let left = color_bars(input, index, [200, 80, 20, 255])?;
        let right = color_bars(input, index * 2, [20, 80, 200, 255])?;

        if let Some(mixed) = compositor.mix(&left, &right) {
            if index == 0 {
                save_snapshot(&mixed, &output.with_extension("png"))?;
            }
            recorder.submit_video(mixed, pts);
        }
        recorder.submit_audio(tone(index as usize * samples_per_frame, samples_per_frame, pts));

        // Pace like a live camera.
        let due = frame_interval * (index + 1);
        if let Some(wait) = due.checked_sub(started.elapsed()) {
            std::thread::sleep(wait);
        }
    }

    let finished = recorder.stop().context("Recorder stopped unexpectedly")?;
    let path = finished
        .blocking_recv()
        .context("Finalize thread exited without reporting")?;

    running.store(false, Ordering::Relaxed);
    let _ = sensors.join();
    Ok(path)
}

/// Solid background with a vertical bar that moves one column per frame.
fn color_bars(format: FormatDescription, index: u32, color: [u8; 4]) -> DualCamResult<FrameBuffer> {
    let mut frame = FrameBuffer::filled(format, color)?;
    let bar_x = (index * 4) % format.width;
    let stride = frame.stride();
    let data = frame.data_mut();
    for y in 0..format.height as usize {
        for x in bar_x..(bar_x + 16).min(format.width) {
            let offset = y * stride + x as usize * 4;
            data[offset..offset + 4].copy_from_slice(&[255, 255, 255, 255]);
        }
    }
    Ok(frame)
}

/// 440 Hz mono sine starting at sample `start`.
fn tone(start: usize, len: usize, pts: Timestamp) -> AudioBuffer {
    let samples = (start..start + len)
        .map(|n| ((n as f64 * 440.0 * TAU / SAMPLE_RATE as f64).sin() * 0.2) as f32)
        .collect();
    AudioBuffer::new(samples, 1, SAMPLE_RATE, pts)
}

fn spawn_fake_sensors(
    telemetry: Arc<SharedTelemetry>,
    running: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let started = Instant::now();
        while running.load(Ordering::Relaxed) {
            let t = started.elapsed().as_secs_f64();
            telemetry.update_acceleration([t.sin() * 0.1, -0.98, t.cos() * 0.1]);
            telemetry.update_rotation_rate([0.01 * t.cos(), 0.02, -0.01 * t.sin()]);
            std::thread::sleep(Duration::from_millis(10));
        }
    })
}

/// Write a BGRA frame as PNG.
fn save_snapshot(frame: &FrameBuffer, path: &Path) -> DualCamResult<()> {
    let mut rgba = frame.packed_data().into_owned();
    for px in rgba.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
    let image = image::RgbaImage::from_raw(frame.width(), frame.height(), rgba)
        .context("Snapshot buffer size mismatch")?;
    image
        .save(path)
        .with_context(|| format!("Failed to save snapshot {}", path.display()))?;
    log::info!("Snapshot saved: {}", path.display());
    Ok(())
}
