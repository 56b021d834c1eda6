//! Raw audio sample buffers.

use std::time::Duration;

use super::time::Timestamp;

/// Interleaved 32-bit float PCM delivered by the capture session.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    pub pts: Timestamp,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32, pts: Timestamp) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
            pts,
        }
    }

    /// Sample frames (one sample per channel) in this buffer.
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_of_stereo_buffer() {
        let buffer = AudioBuffer::new(vec![0.0; 48_000 * 2 / 10], 2, 48_000, Timestamp::ZERO);
        assert_eq!(buffer.frame_count(), 4_800);
        assert_eq!(buffer.duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_degenerate_buffer() {
        let buffer = AudioBuffer::new(vec![0.0; 8], 0, 0, Timestamp::ZERO);
        assert_eq!(buffer.frame_count(), 0);
        assert_eq!(buffer.duration(), Duration::ZERO);
    }
}
