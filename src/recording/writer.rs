//! Container writer abstraction.
//!
//! The recorder drives a writer through a small state machine (unknown, writing,
//! completed or failed) and asks each track whether it can take more media before
//! appending. Implementations decide how readiness maps onto their own buffering.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::transform::VideoTransform;
use crate::error::DualCamResult;
use crate::media::{AudioBuffer, FrameBuffer, Timestamp};

/// Media type of a writer input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Container produced by a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    #[default]
    Mov,
}

impl ContainerFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Mov => "mov",
        }
    }

    /// FFmpeg muxer name.
    pub fn muxer(self) -> &'static str {
        match self {
            ContainerFormat::Mov => "mov",
        }
    }
}

/// Lifecycle of a container writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterStatus {
    /// Inputs may still be added; nothing written yet.
    Unknown,
    Writing,
    Completed,
    Failed,
}

/// Opaque encoder settings passed through to the writer as key/value pairs.
///
/// The FFmpeg writer turns each entry into a `-key value` argument pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputSettings(BTreeMap<String, String>);

impl OutputSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Settings as FFmpeg arguments, in key order.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|(key, value)| {
                let flag = if key.starts_with('-') {
                    key.clone()
                } else {
                    format!("-{}", key)
                };
                [flag, value.clone()]
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for OutputSettings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One track added to a writer before writing starts.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInput {
    pub kind: TrackKind,
    pub settings: OutputSettings,
    /// Media arrives from a live source; the writer must not stall the producer.
    pub expects_realtime: bool,
    pub transform: VideoTransform,
}

impl TrackInput {
    pub fn audio(settings: OutputSettings) -> Self {
        Self {
            kind: TrackKind::Audio,
            settings,
            expects_realtime: true,
            transform: VideoTransform::IDENTITY,
        }
    }

    pub fn video(settings: OutputSettings, transform: VideoTransform) -> Self {
        Self {
            kind: TrackKind::Video,
            settings,
            expects_realtime: true,
            transform,
        }
    }
}

/// Multiplexing writer for one output file.
pub trait ContainerWriter: Send + 'static {
    /// Add a track. Only valid while the status is `Unknown`.
    fn add_input(&mut self, input: TrackInput) -> DualCamResult<()>;

    fn status(&self) -> WriterStatus;

    /// Move from `Unknown` to `Writing`.
    fn start_writing(&mut self) -> DualCamResult<()>;

    /// Anchor the output timeline at `origin`.
    fn start_session(&mut self, origin: Timestamp);

    /// Whether the track can take another buffer without blocking.
    fn is_ready_for_more_media_data(&self, kind: TrackKind) -> bool;

    fn append_video(&mut self, frame: FrameBuffer, pts: Timestamp) -> DualCamResult<()>;

    fn append_audio(&mut self, buffer: AudioBuffer) -> DualCamResult<()>;

    /// Flush everything and close the container. Blocks until the file is complete.
    fn finish_writing(self) -> DualCamResult<PathBuf>;

    fn output_path(&self) -> &Path;
}

/// Creates a writer per recording session.
pub trait WriterFactory: Send + Sync + 'static {
    type Writer: ContainerWriter;

    fn create_writer(&self, path: &Path, format: ContainerFormat) -> DualCamResult<Self::Writer>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_to_ffmpeg_args() {
        let settings = OutputSettings::new()
            .with("c:v", "libx264")
            .with("-preset", "veryfast");
        assert_eq!(
            settings.to_ffmpeg_args(),
            vec!["-c:v", "libx264", "-preset", "veryfast"]
        );
    }

    #[test]
    fn test_settings_json_is_a_plain_map() {
        let settings: OutputSettings =
            serde_json::from_str(r#"{"b:a": "128k", "c:a": "aac"}"#).unwrap();
        assert_eq!(settings.get("c:a"), Some("aac"));
        assert_eq!(
            serde_json::to_string(&settings).unwrap(),
            r#"{"b:a":"128k","c:a":"aac"}"#
        );
    }

    #[test]
    fn test_track_inputs_are_realtime() {
        assert!(TrackInput::audio(OutputSettings::new()).expects_realtime);
        let video = TrackInput::video(OutputSettings::new(), VideoTransform::IDENTITY);
        assert!(video.expects_realtime);
        assert_eq!(video.kind, TrackKind::Video);
    }
}
