//! Recording configuration.
//!
//! Encoder settings are opaque key/value maps handed straight to the container
//! writer; this crate never interprets them beyond the frame rate.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::recording::{OutputSettings, VideoTransform};

/// Frame rate assumed when the video settings do not carry one.
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Construction settings for the multiplexed recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingConfig {
    /// Audio encoder settings.
    pub audio_settings: OutputSettings,

    /// Video encoder settings. The `r` key sets the output frame rate.
    pub video_settings: OutputSettings,

    /// Orientation applied to the video track.
    pub video_transform: VideoTransform,

    /// Directory for session files. Defaults to the system temp directory.
    pub output_dir: Option<PathBuf>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            audio_settings: OutputSettings::new()
                .with("c:a", "aac")
                .with("b:a", "128k"),
            video_settings: OutputSettings::new()
                .with("c:v", "libx264")
                .with("preset", "veryfast")
                .with("pix_fmt", "yuv420p")
                .with("r", DEFAULT_FRAME_RATE.to_string()),
            video_transform: VideoTransform::IDENTITY,
            output_dir: None,
        }
    }
}

impl RecordingConfig {
    /// Validate and clamp settings to acceptable ranges.
    pub fn validate(&mut self) {
        let fps = self.frame_rate();
        self.video_settings.insert("r", fps.to_string());
    }

    /// Output frame rate from the `r` video setting (1-240).
    pub fn frame_rate(&self) -> u32 {
        self.video_settings
            .get("r")
            .and_then(|r| r.parse::<u32>().ok())
            .unwrap_or(DEFAULT_FRAME_RATE)
            .clamp(1, 240)
    }

    /// Directory new session files are created in.
    pub fn scratch_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RecordingConfig::default();
        assert_eq!(config.frame_rate(), 30);
        assert_eq!(config.audio_settings.get("c:a"), Some("aac"));
        assert_eq!(config.scratch_dir(), std::env::temp_dir());
    }

    #[test]
    fn test_validate_repairs_frame_rate() {
        let mut config = RecordingConfig::default();
        config.video_settings.insert("r", "not-a-number");
        config.validate();
        assert_eq!(config.video_settings.get("r"), Some("30"));

        config.video_settings.insert("r", "1000");
        config.validate();
        assert_eq!(config.frame_rate(), 240);
    }
}
