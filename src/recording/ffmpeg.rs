//! FFmpeg-backed container writer.
//!
//! Video frames are piped as raw pixels into an FFmpeg encoder process on a writer
//! thread; audio is spooled to a float WAV file with `hound` on a second thread. Each
//! track is fed through a bounded channel, and a full channel is what "not ready for
//! more media data" means. `finish_writing` drains both tracks and muxes them into the
//! final container with a stream-copy pass.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use super::writer::{
    ContainerFormat, ContainerWriter, TrackInput, TrackKind, WriterFactory, WriterStatus,
};
use crate::config::recording::DEFAULT_FRAME_RATE;
use crate::config::WriterConfig;
use crate::error::{DualCamError, DualCamResult};
use crate::media::{AudioBuffer, FormatDescription, FrameBuffer, Timestamp};

/// Longest timestamp gap filled with repeated frames.
const MAX_GAP_SECS: f64 = 5.0;

/// Find ffmpeg binary using ffmpeg-sidecar's path resolution, falling back to PATH.
pub fn find_ffmpeg() -> Option<PathBuf> {
    let sidecar_path = ffmpeg_sidecar::paths::ffmpeg_path();
    if test_ffmpeg_binary(&sidecar_path) {
        log::debug!("[WRITER] Using sidecar ffmpeg: {}", sidecar_path.display());
        return Some(sidecar_path);
    }

    let binary_name = if cfg!(windows) {
        "ffmpeg.exe"
    } else {
        "ffmpeg"
    };
    if let Some(path) = find_in_system_path(binary_name) {
        if test_ffmpeg_binary(&path) {
            log::debug!("[WRITER] Using system ffmpeg: {}", path.display());
            return Some(path);
        }
    }

    log::warn!("[WRITER] No working ffmpeg found");
    None
}

/// Test if an ffmpeg binary works by running -version
fn test_ffmpeg_binary(path: &Path) -> bool {
    Command::new(path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Find an executable in system PATH
fn find_in_system_path(name: &str) -> Option<PathBuf> {
    let cmd = if cfg!(windows) { "where" } else { "which" };
    let output = Command::new(cmd).arg(name).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout.lines().next()?.trim();
    (!first_line.is_empty()).then(|| PathBuf::from(first_line))
}

/// Create a Command configured to hide the console window on Windows.
fn ffmpeg_command(program: &Path) -> Command {
    let mut cmd = Command::new(program);

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.args(["-hide_banner", "-loglevel", "error", "-y"]);
    cmd
}

/// Creates [`FfmpegWriter`]s sharing one resolved binary and buffering config.
pub struct FfmpegWriterFactory {
    ffmpeg: PathBuf,
    config: WriterConfig,
}

impl FfmpegWriterFactory {
    /// Resolve FFmpeg from `config.ffmpeg_path` or by searching.
    pub fn new(config: WriterConfig) -> DualCamResult<Self> {
        let ffmpeg = match &config.ffmpeg_path {
            Some(path) if test_ffmpeg_binary(path) => path.clone(),
            Some(path) => {
                log::warn!(
                    "[WRITER] Configured ffmpeg {} is not usable, searching",
                    path.display()
                );
                find_ffmpeg().ok_or(DualCamError::FfmpegNotFound)?
            },
            None => find_ffmpeg().ok_or(DualCamError::FfmpegNotFound)?,
        };
        Ok(Self { ffmpeg, config })
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }
}

impl WriterFactory for FfmpegWriterFactory {
    type Writer = FfmpegWriter;

    fn create_writer(&self, path: &Path, format: ContainerFormat) -> DualCamResult<FfmpegWriter> {
        FfmpegWriter::new(self.ffmpeg.clone(), self.config.clone(), path, format)
    }
}

/// Frame handed to the video writer thread, stamped relative to the session origin.
struct TimedFrame {
    frame: FrameBuffer,
    offset: Duration,
}

struct VideoTrack {
    tx: Sender<TimedFrame>,
    handle: JoinHandle<DualCamResult<u64>>,
}

struct AudioTrack {
    tx: Sender<AudioBuffer>,
    handle: JoinHandle<DualCamResult<AudioSpool>>,
}

/// What the audio thread left on disk.
struct AudioSpool {
    first_pts: Option<Timestamp>,
    samples: u64,
}

/// Container writer driving FFmpeg.
pub struct FfmpegWriter {
    ffmpeg: PathBuf,
    config: WriterConfig,
    format: ContainerFormat,
    output_path: PathBuf,
    video_temp: PathBuf,
    audio_temp: PathBuf,
    status: WriterStatus,
    video_input: Option<TrackInput>,
    audio_input: Option<TrackInput>,
    origin: Option<Timestamp>,
    video: Option<VideoTrack>,
    audio: Option<AudioTrack>,
}

impl FfmpegWriter {
    pub(crate) fn new(
        ffmpeg: PathBuf,
        config: WriterConfig,
        output_path: &Path,
        format: ContainerFormat,
    ) -> DualCamResult<Self> {
        let parent = output_path.parent().unwrap_or_else(|| Path::new("."));
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(DualCamError::WriterError(format!(
                "Output directory {} does not exist",
                parent.display()
            )));
        }
        if output_path.exists() {
            return Err(DualCamError::WriterError(format!(
                "Output file {} already exists",
                output_path.display()
            )));
        }

        Ok(Self {
            ffmpeg,
            config,
            format,
            output_path: output_path.to_path_buf(),
            video_temp: output_path.with_extension("video.mkv"),
            audio_temp: output_path.with_extension("audio.wav"),
            status: WriterStatus::Unknown,
            video_input: None,
            audio_input: None,
            origin: None,
            video: None,
            audio: None,
        })
    }

    fn fail(&mut self, reason: &str) -> DualCamError {
        log::error!("[WRITER] {}", reason);
        self.status = WriterStatus::Failed;
        DualCamError::WriterError(reason.to_string())
    }

    fn remove_temp_files(&self) {
        for path in [&self.video_temp, &self.audio_temp] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    log::warn!("[WRITER] Failed to remove {}: {}", path.display(), e);
                }
            }
        }
    }
}

impl ContainerWriter for FfmpegWriter {
    fn add_input(&mut self, input: TrackInput) -> DualCamResult<()> {
        if self.status != WriterStatus::Unknown {
            return Err(DualCamError::WriterError(
                "Inputs can only be added before writing starts".into(),
            ));
        }
        let slot = match input.kind {
            TrackKind::Video => &mut self.video_input,
            TrackKind::Audio => &mut self.audio_input,
        };
        if slot.is_some() {
            return Err(DualCamError::WriterError(format!(
                "A {} input was already added",
                input.kind
            )));
        }
        *slot = Some(input);
        Ok(())
    }

    fn status(&self) -> WriterStatus {
        self.status
    }

    fn start_writing(&mut self) -> DualCamResult<()> {
        if self.status != WriterStatus::Unknown {
            return Err(DualCamError::WriterError(format!(
                "Cannot start writing from {:?}",
                self.status
            )));
        }
        let Some(video_input) = self.video_input.as_ref() else {
            return Err(self.fail("No video input added"));
        };

        let fps = frame_rate(video_input);
        let (tx, rx) = bounded(self.config.video_queue_depth.max(1));
        let encoder = VideoEncoderJob {
            ffmpeg: self.ffmpeg.clone(),
            settings: video_input.settings.to_ffmpeg_args(),
            fps,
            output: self.video_temp.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("ffmpeg-video-writer".into())
            .spawn(move || encoder.run(rx))?;
        self.video = Some(VideoTrack { tx, handle });

        if self.audio_input.is_some() {
            let (tx, rx) = bounded(self.config.audio_queue_depth.max(1));
            let path = self.audio_temp.clone();
            let handle = std::thread::Builder::new()
                .name("wav-audio-writer".into())
                .spawn(move || spool_audio(&path, rx))?;
            self.audio = Some(AudioTrack { tx, handle });
        }

        self.status = WriterStatus::Writing;
        log::debug!(
            "[WRITER] Writing {} at {} fps",
            self.output_path.display(),
            fps
        );
        Ok(())
    }

    fn start_session(&mut self, origin: Timestamp) {
        if self.origin.is_none() {
            log::debug!("[WRITER] Session origin {}", origin);
            self.origin = Some(origin);
        }
    }

    fn is_ready_for_more_media_data(&self, kind: TrackKind) -> bool {
        if self.status != WriterStatus::Writing {
            return false;
        }
        match kind {
            TrackKind::Video => self.video.as_ref().is_some_and(|t| !t.tx.is_full()),
            TrackKind::Audio => self.audio.as_ref().is_some_and(|t| !t.tx.is_full()),
        }
    }

    fn append_video(&mut self, frame: FrameBuffer, pts: Timestamp) -> DualCamResult<()> {
        if self.status != WriterStatus::Writing {
            return Err(DualCamError::WriterError("Writer is not writing".into()));
        }
        let origin = self.origin.unwrap_or(pts);
        let Some(offset) = pts.since(origin) else {
            log::trace!("[WRITER] Dropping video frame before session origin");
            return Ok(());
        };
        let Some(track) = self.video.as_ref() else {
            return Err(self.fail("Video track missing"));
        };
        match track.tx.try_send(TimedFrame { frame, offset }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DualCamError::WriterError(
                "Video track not ready for more media data".into(),
            )),
            Err(TrySendError::Disconnected(_)) => Err(self.fail("Video encoder stopped")),
        }
    }

    fn append_audio(&mut self, buffer: AudioBuffer) -> DualCamResult<()> {
        if self.status != WriterStatus::Writing {
            return Err(DualCamError::WriterError("Writer is not writing".into()));
        }
        let Some(track) = self.audio.as_ref() else {
            return Err(DualCamError::WriterError("No audio input added".into()));
        };
        match track.tx.try_send(buffer) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DualCamError::WriterError(
                "Audio track not ready for more media data".into(),
            )),
            Err(TrySendError::Disconnected(_)) => Err(self.fail("Audio spool stopped")),
        }
    }

    fn finish_writing(mut self) -> DualCamResult<PathBuf> {
        let video = self.video.take();
        let audio = self.audio.take();

        // Dropping the senders ends both writer threads.
        let video_result = video.map(|track| {
            drop(track.tx);
            join_track(track.handle, "video")
        });
        let audio_result = audio.map(|track| {
            drop(track.tx);
            join_track(track.handle, "audio")
        });

        let frames = match video_result {
            Some(Ok(frames)) if frames > 0 => frames,
            Some(Ok(_)) | None => {
                self.remove_temp_files();
                return Err(self.fail("No video frames were written"));
            },
            Some(Err(e)) => {
                self.remove_temp_files();
                return Err(self.fail(&format!("Video encoding failed: {}", e)));
            },
        };

        let audio_offset = match audio_result {
            Some(Ok(spool)) if spool.samples > 0 => spool.first_pts.map(|first| {
                let origin = self.origin.unwrap_or(first);
                first.secs_since(origin)
            }),
            Some(Err(e)) => {
                log::warn!("[WRITER] Dropping audio track: {}", e);
                None
            },
            _ => None,
        };

        let rotation = self
            .video_input
            .as_ref()
            .map(|input| input.transform.display_rotation())
            .unwrap_or(0.0);
        let audio_settings = self
            .audio_input
            .as_ref()
            .map(|input| input.settings.to_ffmpeg_args())
            .unwrap_or_default();

        let args = mux_args(&MuxPlan {
            video: &self.video_temp,
            audio: audio_offset.map(|offset| (self.audio_temp.as_path(), offset)),
            display_rotation: rotation,
            audio_settings: &audio_settings,
            format: self.format,
            output: &self.output_path,
        });

        let output = ffmpeg_command(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();
        self.remove_temp_files();

        match output {
            Ok(out) if out.status.success() => {},
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                return Err(self.fail(&format!("Mux failed ({}): {}", out.status, stderr)));
            },
            Err(e) => return Err(self.fail(&format!("Failed to start ffmpeg: {}", e))),
        }

        self.status = WriterStatus::Completed;
        log::info!(
            "[WRITER] Finished {} ({} frames{})",
            self.output_path.display(),
            frames,
            if audio_offset.is_some() {
                ", with audio"
            } else {
                ""
            }
        );
        Ok(self.output_path.clone())
    }

    fn output_path(&self) -> &Path {
        &self.output_path
    }
}

fn join_track<T>(handle: JoinHandle<DualCamResult<T>>, kind: &str) -> DualCamResult<T> {
    handle
        .join()
        .map_err(|_| DualCamError::WriterError(format!("{} writer thread panicked", kind)))?
}

/// Output frame rate from the `r` video setting.
fn frame_rate(input: &TrackInput) -> u32 {
    input
        .settings
        .get("r")
        .and_then(|r| r.parse::<u32>().ok())
        .filter(|fps| *fps > 0)
        .unwrap_or(DEFAULT_FRAME_RATE)
}

/// Index of the constant-rate output slot nearest to `offset`.
fn frame_slot(offset: Duration, fps: u32) -> u64 {
    (offset.as_secs_f64() * fps as f64).round() as u64
}

/// Raw-video encoder running on the video writer thread.
struct VideoEncoderJob {
    ffmpeg: PathBuf,
    settings: Vec<String>,
    fps: u32,
    output: PathBuf,
}

/// FFmpeg process fed raw frames on stdin.
///
/// Its stderr is drained on a helper thread so a chatty encoder never blocks on a
/// full pipe.
struct RawVideoPipe {
    child: Child,
    stdin: ChildStdin,
    stderr: Option<JoinHandle<String>>,
    format: FormatDescription,
}

impl RawVideoPipe {
    /// Take ownership of a child spawned with piped stdin and stderr.
    fn attach(mut child: Child, format: FormatDescription) -> DualCamResult<Self> {
        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DualCamError::WriterError("Failed to get FFmpeg stdin".into()));
        };
        let stderr = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });
        Ok(Self {
            child,
            stdin,
            stderr,
            format,
        })
    }

    /// Close stdin and wait for the encoder to exit.
    fn finish(self) -> DualCamResult<()> {
        let Self {
            mut child,
            stdin,
            stderr,
            ..
        } = self;
        drop(stdin);
        let status = child.wait()?;
        let output = stderr.and_then(|h| h.join().ok()).unwrap_or_default();
        let output = output.trim();
        if !status.success() {
            return Err(DualCamError::WriterError(format!(
                "Video encoder exited with {}: {}",
                status, output
            )));
        }
        if !output.is_empty() {
            log::debug!("[WRITER] Video encoder stderr: {}", output);
        }
        Ok(())
    }

    /// Kill the encoder and reap it.
    fn abort(self) -> Option<ExitStatus> {
        let Self {
            mut child,
            stdin,
            stderr,
            ..
        } = self;
        drop(stdin);
        let _ = child.kill();
        let status = child.wait().ok();
        if let Some(handle) = stderr {
            let _ = handle.join();
        }
        log::debug!("[WRITER] Video encoder aborted ({:?})", status);
        status
    }
}

impl VideoEncoderJob {
    /// Encode frames onto a constant-rate grid. Returns the number of frames written.
    ///
    /// On any error the encoder process is killed and reaped before returning.
    fn run(self, rx: Receiver<TimedFrame>) -> DualCamResult<u64> {
        let mut pipe: Option<RawVideoPipe> = None;
        match self.feed(&rx, &mut pipe) {
            Ok(written) => {
                if let Some(encoder) = pipe {
                    encoder.finish()?;
                }
                Ok(written)
            },
            Err(e) => {
                if let Some(encoder) = pipe {
                    encoder.abort();
                }
                Err(e)
            },
        }
    }

    fn feed(&self, rx: &Receiver<TimedFrame>, pipe: &mut Option<RawVideoPipe>) -> DualCamResult<u64> {
        let mut next_slot: u64 = 0;
        let mut written: u64 = 0;
        let mut late: u64 = 0;
        let mut last: Option<Vec<u8>> = None;
        let max_gap = (MAX_GAP_SECS * self.fps as f64) as u64;

        for TimedFrame { frame, offset } in rx.iter() {
            let slot = frame_slot(offset, self.fps);
            if slot < next_slot {
                late += 1;
                continue;
            }

            if pipe.is_none() {
                *pipe = Some(self.spawn(frame.format())?);
            }
            let Some(encoder) = pipe.as_mut() else {
                continue;
            };
            if frame.format() != encoder.format {
                log::warn!(
                    "[WRITER] Dropping {} frame, encoder expects {}",
                    frame.format(),
                    encoder.format
                );
                continue;
            }

            if let Some(previous) = &last {
                let gap = slot - next_slot;
                if gap > max_gap {
                    log::warn!("[WRITER] {} frame gap not filled", gap);
                } else {
                    for _ in 0..gap {
                        encoder.stdin.write_all(previous)?;
                        written += 1;
                    }
                }
            }

            let packed = frame.packed_data().into_owned();
            drop(frame);
            encoder.stdin.write_all(&packed)?;
            written += 1;
            last = Some(packed);
            next_slot = slot + 1;
        }

        if late > 0 {
            log::debug!("[WRITER] Dropped {} late video frames", late);
        }
        Ok(written)
    }

    fn spawn(&self, format: FormatDescription) -> DualCamResult<RawVideoPipe> {
        let size = format!("{}x{}", format.width, format.height);
        let fps = self.fps.to_string();
        let child = ffmpeg_command(&self.ffmpeg)
            .args(["-f", "rawvideo", "-pix_fmt", format.pixel_format.ffmpeg_name()])
            .args(["-s", size.as_str(), "-r", fps.as_str(), "-i", "pipe:0"])
            .args(&self.settings)
            .arg("-an")
            .arg(&self.output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DualCamError::WriterError(format!("Failed to start FFmpeg: {}", e)))?;

        let pipe = RawVideoPipe::attach(child, format)?;
        log::debug!("[WRITER] Video encoder started for {}", format);
        Ok(pipe)
    }
}

/// Write audio buffers to a float WAV file. The first buffer fixes the layout.
fn spool_audio(path: &Path, rx: Receiver<AudioBuffer>) -> DualCamResult<AudioSpool> {
    let mut writer: Option<hound::WavWriter<std::io::BufWriter<std::fs::File>>> = None;
    let mut spool = AudioSpool {
        first_pts: None,
        samples: 0,
    };
    let mut layout = (0u16, 0u32);

    for buffer in rx.iter() {
        if buffer.channels == 0 || buffer.sample_rate == 0 {
            continue;
        }
        if writer.is_none() {
            let spec = hound::WavSpec {
                channels: buffer.channels,
                sample_rate: buffer.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            };
            layout = (buffer.channels, buffer.sample_rate);
            spool.first_pts = Some(buffer.pts);
            writer = Some(hound::WavWriter::create(path, spec)?);
        }
        let Some(wav) = writer.as_mut() else {
            continue;
        };
        if (buffer.channels, buffer.sample_rate) != layout {
            log::warn!(
                "[WRITER] Dropping audio buffer with layout {}ch/{}Hz",
                buffer.channels,
                buffer.sample_rate
            );
            continue;
        }
        for sample in &buffer.samples {
            wav.write_sample(*sample)?;
        }
        spool.samples += buffer.samples.len() as u64;
    }

    if let Some(wav) = writer {
        wav.finalize()?;
    }
    Ok(spool)
}

/// Inputs of the final stream-copy mux.
struct MuxPlan<'a> {
    video: &'a Path,
    /// Spooled audio and its start relative to the session origin, in seconds.
    audio: Option<(&'a Path, f64)>,
    display_rotation: f64,
    audio_settings: &'a [String],
    format: ContainerFormat,
    output: &'a Path,
}

fn mux_args(plan: &MuxPlan<'_>) -> Vec<String> {
    let mut args = Vec::new();
    if plan.display_rotation != 0.0 {
        args.push("-display_rotation".to_string());
        args.push(format!("{}", plan.display_rotation));
    }
    args.push("-i".to_string());
    args.push(plan.video.display().to_string());

    if let Some((audio, offset)) = plan.audio {
        if offset != 0.0 {
            args.push("-itsoffset".to_string());
            args.push(format!("{:.6}", offset));
        }
        args.push("-i".to_string());
        args.push(audio.display().to_string());
    }

    args.extend(["-map", "0:v:0"].map(String::from));
    if plan.audio.is_some() {
        args.extend(["-map", "1:a:0"].map(String::from));
    }
    args.extend(["-c:v", "copy"].map(String::from));
    if plan.audio.is_some() {
        args.extend(plan.audio_settings.iter().cloned());
    }
    args.push("-f".to_string());
    args.push(plan.format.muxer().to_string());
    args.push(plan.output.display().to_string());
    args
}
