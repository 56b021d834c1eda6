//! Central error types for dualcam.
//!
//! Setup failures (pool, texture cache, writer construction) surface through
//! `DualCamError`. Per-frame failures are absorbed by their component and never
//! reach this type; precondition violations panic instead.

use serde::Serialize;
use thiserror::Error;

use crate::media::PixelFormat;

/// Main error type for dualcam operations.
#[derive(Error, Debug)]
pub enum DualCamError {
    /// No usable GPU adapter or device.
    #[error("GPU error: {0}")]
    GpuError(String),

    /// Frame dimensions the allocator or GPU cannot handle.
    #[error("Invalid format: {width}x{height}")]
    InvalidFormat { width: u32, height: u32 },

    /// Pixel encoding not accepted by the pool, bridge or overlay.
    #[error("Unsupported pixel format: {0:?}")]
    UnsupportedPixelFormat(PixelFormat),

    /// Buffer pool rejected its retained-count hint.
    #[error("Invalid retained buffer count: {0}")]
    InvalidRetainedCount(usize),

    /// Texture cache rejected a buffer.
    #[error("Texture cache error: {0}")]
    TextureCacheError(String),

    /// Container writer failed.
    #[error("Writer error: {0}")]
    WriterError(String),

    /// FFmpeg binary not found
    #[error("FFmpeg not found. Please ensure FFmpeg is installed or configure its path.")]
    FfmpegNotFound,

    /// A recording session is already active.
    #[error("A recording is already in progress")]
    AlreadyRecording,

    /// Overlay rendering failed.
    #[error("Overlay error: {0}")]
    OverlayError(String),

    /// File system operation failed
    #[error("Storage error: {0}")]
    StorageError(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

/// Serialized as the error message so status reports stay human readable.
impl Serialize for DualCamError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<String> for DualCamError {
    fn from(msg: String) -> Self {
        DualCamError::Other(msg)
    }
}

impl From<&str> for DualCamError {
    fn from(msg: &str) -> Self {
        DualCamError::Other(msg.to_string())
    }
}

impl From<hound::Error> for DualCamError {
    fn from(err: hound::Error) -> Self {
        DualCamError::WriterError(err.to_string())
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error, converting it to DualCamError::Other.
    fn context(self, msg: &str) -> DualCamResult<T>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F: FnOnce() -> String>(self, f: F) -> DualCamResult<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn context(self, msg: &str) -> DualCamResult<T> {
        self.map_err(|e| DualCamError::Other(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> DualCamResult<T> {
        self.map_err(|e| DualCamError::Other(format!("{}: {}", f(), e)))
    }
}

/// Extension trait for adding context to Option types.
pub trait OptionExt<T> {
    /// Convert None to DualCamError::Other with the given message.
    fn context(self, msg: &str) -> DualCamResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn context(self, msg: &str) -> DualCamResult<T> {
        self.ok_or_else(|| DualCamError::Other(msg.to_string()))
    }
}

/// Type alias for Results using DualCamError.
pub type DualCamResult<T> = Result<T, DualCamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DualCamError::InvalidFormat {
            width: 0,
            height: 720,
        };
        assert_eq!(err.to_string(), "Invalid format: 0x720");
    }

    #[test]
    fn test_error_serialization() {
        let err = DualCamError::FfmpegNotFound;
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("FFmpeg not found"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DualCamError = io_err.into();
        assert!(matches!(err, DualCamError::StorageError(_)));
    }

    #[test]
    fn test_unsupported_format_mentions_encoding() {
        let err = DualCamError::UnsupportedPixelFormat(PixelFormat::Nv12);
        assert!(err.to_string().contains("Nv12"));
    }

    #[test]
    fn test_result_ext_context() {
        let result: Result<(), &str> = Err("original error");
        let msg = result.context("operation failed").unwrap_err().to_string();
        assert!(msg.contains("operation failed"));
        assert!(msg.contains("original error"));
    }

    #[test]
    fn test_option_ext_context() {
        let opt: Option<i32> = None;
        let result = opt.context("value was missing");
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("value was missing"));
    }
}
