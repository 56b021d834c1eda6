//! FFmpeg writer configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Buffering and binary location for the FFmpeg-backed container writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WriterConfig {
    /// Video frames queued ahead of the encoder before the track reports not ready.
    pub video_queue_depth: usize,

    /// Audio buffers queued ahead of the WAV writer before the track reports not ready.
    pub audio_queue_depth: usize,

    /// Explicit FFmpeg binary. Searched for when unset.
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            video_queue_depth: 8,
            audio_queue_depth: 64,
            ffmpeg_path: None,
        }
    }
}

impl WriterConfig {
    /// Validate and clamp settings to acceptable ranges.
    pub fn validate(&mut self) {
        self.video_queue_depth = self.video_queue_depth.clamp(1, 120);
        self.audio_queue_depth = self.audio_queue_depth.clamp(1, 1024);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_clamps_depths() {
        let mut config = WriterConfig {
            video_queue_depth: 0,
            audio_queue_depth: 10_000,
            ffmpeg_path: None,
        };
        config.validate();
        assert_eq!(config.video_queue_depth, 1);
        assert_eq!(config.audio_queue_depth, 1024);
    }
}
