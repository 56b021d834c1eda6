//! Multiplexed movie recorder.
//!
//! Owns one container writer per session with an audio and a video track. Producers
//! call `submit_video`/`submit_audio` from any thread; all session and writer state
//! sits behind a single mutex. Frames a track is not ready for are dropped, never
//! queued. Stopping hands the writer to a finalize thread and reports the output path
//! through a callback.
//!
//! ## Architecture
//!
//! - `writer`: container writer traits and track types
//! - `ffmpeg`: FFmpeg-backed writer used in production
//! - `session`: per-session state and statistics
//! - `transform`: orientation transform for the video track

pub mod ffmpeg;
pub mod session;
pub mod transform;
pub mod writer;


use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

use crate::config::RecordingConfig;
use crate::error::{DualCamError, DualCamResult};
use crate::media::{AudioBuffer, FrameBuffer, Timestamp};
use crate::rendering::overlay::OverlayRenderer;
use crate::telemetry::TelemetrySource;

pub use ffmpeg::{find_ffmpeg, FfmpegWriter, FfmpegWriterFactory};
pub use session::{SessionInfo, SessionStats};
pub use transform::VideoTransform;
pub use writer::{
    ContainerFormat, ContainerWriter, OutputSettings, TrackInput, TrackKind, WriterFactory,
    WriterStatus,
};

use session::RecordingSession;

/// Records overlaid video and raw audio into one container per session.
pub struct MovieRecorder<F: WriterFactory> {
    settings: RecordingConfig,
    factory: F,
    telemetry: Arc<dyn TelemetrySource>,
    overlay: OverlayRenderer,
    session: Mutex<Option<RecordingSession<F::Writer>>>,
    recording_tx: watch::Sender<bool>,
}

impl<F: WriterFactory> MovieRecorder<F> {
    pub fn new(
        settings: RecordingConfig,
        factory: F,
        telemetry: Arc<dyn TelemetrySource>,
        overlay: OverlayRenderer,
    ) -> Self {
        let (recording_tx, _) = watch::channel(false);
        Self {
            settings,
            factory,
            telemetry,
            overlay,
            session: Mutex::new(None),
            recording_tx,
        }
    }

    /// Open a new session writing to `<scratch dir>/<uuid>.mov`.
    ///
    /// Fails with `AlreadyRecording` while a session is active. If the writer cannot be
    /// set up nothing changes.
    pub fn start_recording(&self) -> DualCamResult<PathBuf> {
        let mut guard = self.session.lock();
        if guard.is_some() {
            return Err(DualCamError::AlreadyRecording);
        }

        let id = Uuid::new_v4();
        let format = ContainerFormat::Mov;
        let output_path = self
            .settings
            .scratch_dir()
            .join(format!("{}.{}", id, format.extension()));

        let writer = self.create_writer(&output_path, format).map_err(|e| {
            log::error!("[RECORDER] Failed to set up writer: {}", e);
            e
        })?;

        self.telemetry.start_updates();
        *guard = Some(RecordingSession::new(id, output_path.clone(), writer));
        drop(guard);
        self.recording_tx.send_replace(true);

        log::info!("[RECORDER] Recording started: {}", output_path.display());
        Ok(output_path)
    }

    fn create_writer(&self, path: &std::path::Path, format: ContainerFormat) -> DualCamResult<F::Writer> {
        let mut writer = self.factory.create_writer(path, format)?;
        writer.add_input(TrackInput::audio(self.settings.audio_settings.clone()))?;
        writer.add_input(TrackInput::video(
            self.settings.video_settings.clone(),
            self.settings.video_transform,
        ))?;
        Ok(writer)
    }

    /// Finalize the active session on a background thread.
    ///
    /// Returns `false` without calling `on_complete` when not recording. Otherwise
    /// `on_complete` runs exactly once with the output path, even if finalizing failed.
    pub fn stop_recording<C>(&self, on_complete: C) -> bool
    where
        C: FnOnce(PathBuf) + Send + 'static,
    {
        let Some(session) = self.session.lock().take() else {
            return false;
        };
        self.recording_tx.send_replace(false);
        self.telemetry.stop_updates();

        let RecordingSession {
            id,
            output_path,
            writer,
            stats,
            ..
        } = session;
        log::info!(
            "[RECORDER] Stopping session {}: video {} appended / {} dropped, audio {} appended / {} dropped",
            id,
            stats.video_appended,
            stats.video_dropped,
            stats.audio_appended,
            stats.audio_dropped
        );

        let finalize = move || {
            match writer.finish_writing() {
                Ok(path) => log::info!("[RECORDER] Recording saved: {}", path.display()),
                Err(e) => log::error!("[RECORDER] Failed to finalize {}: {}", output_path.display(), e),
            }
            on_complete(output_path);
        };
        run_detached(
            std::thread::Builder::new().name("recorder-finalize".into()),
            finalize,
        );
        true
    }

    /// Stop and await the output path. `None` when not recording.
    pub fn stop(&self) -> Option<oneshot::Receiver<PathBuf>> {
        let (tx, rx) = oneshot::channel();
        self.stop_recording(move |path| {
            let _ = tx.send(path);
        })
        .then_some(rx)
    }

    /// Whether a session is active.
    pub fn is_recording(&self) -> bool {
        *self.recording_tx.borrow()
    }

    /// Receiver that observes every change of the recording flag.
    pub fn watch_recording(&self) -> watch::Receiver<bool> {
        self.recording_tx.subscribe()
    }

    /// Snapshot of the active session.
    pub fn session_info(&self) -> Option<SessionInfo> {
        self.session.lock().as_ref().map(RecordingSession::info)
    }

    /// Draw the latest telemetry onto `frame` and append it to the video track.
    ///
    /// The first frame of a session starts the writer and anchors the timeline at
    /// `pts`. Frames are dropped when not recording or when the track is not ready.
    pub fn submit_video(&self, frame: FrameBuffer, pts: Timestamp) {
        let session_id = {
            let mut guard = self.session.lock();
            let Some(session) = guard.as_mut() else {
                return;
            };

            if session.writer.status() == WriterStatus::Unknown {
                if let Err(e) = session.writer.start_writing() {
                    log::error!("[RECORDER] Failed to start writing: {}", e);
                    session.stats.video_dropped += 1;
                    return;
                }
                session.writer.start_session(pts);
                session.start_time = Some(pts);
                log::debug!("[RECORDER] Session timeline starts at {}", pts);
            }

            if session.writer.status() != WriterStatus::Writing
                || !session.writer.is_ready_for_more_media_data(TrackKind::Video)
            {
                session.stats.video_dropped += 1;
                log::trace!("[RECORDER] Video track not ready, dropping frame at {}", pts);
                return;
            }
            session.id
        };

        // Overlay runs outside the lock so audio keeps flowing.
        let sample = self.telemetry.latest_sample();
        let frame = self.overlay.render(frame, sample.as_ref());

        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut().filter(|s| s.id == session_id) else {
            log::trace!("[RECORDER] Session ended during overlay, dropping frame");
            return;
        };
        match session.writer.append_video(frame, pts) {
            Ok(()) => session.stats.video_appended += 1,
            Err(e) => {
                session.stats.video_dropped += 1;
                log::debug!("[RECORDER] Video append failed: {}", e);
            },
        }
    }

    /// Append raw audio. Dropped unless the writer is writing and the track is ready.
    pub fn submit_audio(&self, buffer: AudioBuffer) {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return;
        };
        if session.writer.status() != WriterStatus::Writing {
            return;
        }
        if !session.writer.is_ready_for_more_media_data(TrackKind::Audio) {
            session.stats.audio_dropped += 1;
            log::trace!("[RECORDER] Audio track not ready, dropping buffer");
            return;
        }
        match session.writer.append_audio(buffer) {
            Ok(()) => session.stats.audio_appended += 1,
            Err(e) => {
                session.stats.audio_dropped += 1;
                log::debug!("[RECORDER] Audio append failed: {}", e);
            },
        }
    }
}

/// Run `job` on a thread from `builder`, or on the calling thread if it cannot spawn.
///
/// `job` runs exactly once either way.
fn run_detached<J>(builder: std::thread::Builder, job: J)
where
    J: FnOnce() + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(job)));
    let thread_slot = Arc::clone(&slot);
    let spawned = builder.spawn(move || {
        let job = thread_slot.lock().take();
        if let Some(job) = job {
            job();
        }
    });
    if let Err(e) = spawned {
        log::error!("[RECORDER] Failed to spawn finalize thread, finalizing inline: {}", e);
        let job = slot.lock().take();
        if let Some(job) = job {
            job();
        }
    }
}
