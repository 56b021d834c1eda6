//! Compositor configuration.

use serde::{Deserialize, Serialize};

use crate::media::pool::MAX_RETAINED_BUFFERS;

/// Settings for the split-screen compositor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MixerConfig {
    /// Output buffers kept in the pool (1-64).
    pub retained_buffer_count: usize,

    /// Preferred compute workgroup width, clamped to device limits at pipeline creation.
    pub thread_execution_width: u32,

    /// Surface textures kept in the texture cache.
    pub texture_cache_capacity: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            retained_buffer_count: 3,
            thread_execution_width: 32,
            texture_cache_capacity: 16,
        }
    }
}

impl MixerConfig {
    /// Validate and clamp settings to acceptable ranges.
    pub fn validate(&mut self) {
        self.retained_buffer_count = self.retained_buffer_count.clamp(1, MAX_RETAINED_BUFFERS);
        self.thread_execution_width = self.thread_execution_width.clamp(1, 1024);
        // Two sources plus every pooled output must fit without thrashing.
        self.texture_cache_capacity = self
            .texture_cache_capacity
            .max(self.retained_buffer_count + 2);
    }
}
