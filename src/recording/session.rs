//! State of one in-progress recording.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::media::Timestamp;

/// Buffers appended and dropped during a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub video_appended: u64,
    pub video_dropped: u64,
    pub audio_appended: u64,
    pub audio_dropped: u64,
}

/// Snapshot of the active session for status reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub output_path: PathBuf,
    pub started_at: DateTime<Local>,
    /// Timestamp of the first video frame, once received.
    pub start_time: Option<Timestamp>,
    pub stats: SessionStats,
}

pub(crate) struct RecordingSession<W> {
    pub id: Uuid,
    pub output_path: PathBuf,
    pub writer: W,
    pub started_at: DateTime<Local>,
    pub start_time: Option<Timestamp>,
    pub stats: SessionStats,
}

impl<W> RecordingSession<W> {
    pub fn new(id: Uuid, output_path: PathBuf, writer: W) -> Self {
        Self {
            id,
            output_path,
            writer,
            started_at: Local::now(),
            start_time: None,
            stats: SessionStats::default(),
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            output_path: self.output_path.clone(),
            started_at: self.started_at,
            start_time: self.start_time,
            stats: self.stats,
        }
    }
}
