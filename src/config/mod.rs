//! Application configuration.
//!
//! Typed, serde-backed settings loaded once at startup from an optional JSON file.
//! Every section has defaults, so a config file only needs the fields it changes.
//!
//! ## Sections
//!
//! - `MixerConfig`: compositor pool and workgroup sizing
//! - `OverlayStyle`: telemetry text placement
//! - `RecordingConfig`: encoder settings and video transform
//! - `WriterConfig`: FFmpeg writer buffering

pub mod mixer;
pub mod overlay;
pub mod recording;
pub mod writer;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DualCamResult, ResultExt};

pub use mixer::MixerConfig;
pub use overlay::OverlayStyle;
pub use recording::RecordingConfig;
pub use writer::WriterConfig;

/// Logger settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Default level filter (`error`..`trace`). `RUST_LOG` takes precedence.
    pub level: String,

    /// Also write logs to a dated file in this directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub mixer: MixerConfig,
    pub overlay: OverlayStyle,
    pub recording: RecordingConfig,
    pub writer: WriterConfig,
}

impl AppConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> DualCamResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.validate();
        log::debug!("[CONFIG] Loaded {}", path.display());
        Ok(config)
    }

    /// Validate and clamp every section.
    pub fn validate(&mut self) {
        self.mixer.validate();
        self.overlay.validate();
        self.recording.validate();
        self.writer.validate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DualCamError;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.logging.level_filter(), log::LevelFilter::Info);
        assert_eq!(config.mixer.retained_buffer_count, 3);
        assert_eq!(config.writer.video_queue_depth, 8);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dualcam.json");
        std::fs::write(
            &path,
            r#"{
                "logging": { "level": "debug" },
                "mixer": { "retainedBufferCount": 0 },
                "recording": { "videoSettings": { "c:v": "libx265", "r": "60" } }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.logging.level_filter(), log::LevelFilter::Debug);
        // Clamped by validate()
        assert_eq!(config.mixer.retained_buffer_count, 1);
        assert_eq!(config.recording.frame_rate(), 60);
        assert_eq!(config.recording.video_settings.get("c:v"), Some("libx265"));
        assert_eq!(config.overlay, OverlayStyle::default());
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load(Path::new("/nonexistent/dualcam.json")).unwrap_err();
        assert!(matches!(err, DualCamError::StorageError(_)));
    }

    #[test]
    fn test_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            log_dir: None,
        };
        assert_eq!(config.level_filter(), log::LevelFilter::Info);
    }
}
