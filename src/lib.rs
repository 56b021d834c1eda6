//! dualcam: split-screen mixing and multiplexed recording for dual-camera capture.
//!
//! Two camera feeds are composited side by side on a GPU compute path
//! ([`Compositor`]), and frames are recorded with a telemetry overlay and raw audio
//! into a movie container ([`MovieRecorder`]).

pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod recording;
pub mod rendering;
pub mod telemetry;

pub use config::AppConfig;
pub use error::{DualCamError, DualCamResult};
pub use media::{AudioBuffer, BufferPool, FormatDescription, FrameBuffer, PixelFormat, Timestamp};
pub use recording::{FfmpegWriterFactory, MovieRecorder};
pub use rendering::{Compositor, GpuContext, OverlayRenderer};
pub use telemetry::{SharedTelemetry, TelemetrySample, TelemetrySource};
