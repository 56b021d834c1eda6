//! Frame buffers and format descriptions.
//!
//! A `FrameBuffer` is an exclusively owned pixel surface. Buffers handed out by a
//! `BufferPool` carry a slot lease and go back to the pool's free list when dropped.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::pool::SlotLease;
use crate::error::{DualCamError, DualCamResult};

/// Pixel encodings understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit B, G, R, A. The compositor's output encoding.
    Bgra8,
    /// 8-bit R, G, B, A.
    Rgba8,
    /// Bi-planar 4:2:0 luma + interleaved chroma, as delivered by most camera sensors.
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats, `None` for planar ones.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => Some(4),
            PixelFormat::Nv12 => None,
        }
    }

    /// Packed (unpadded) bytes in one row of the first plane.
    pub fn row_bytes(self, width: u32) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => width as usize * 4,
            PixelFormat::Nv12 => width as usize,
        }
    }

    /// Rows across all planes.
    pub fn total_rows(self, height: u32) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => height as usize,
            PixelFormat::Nv12 => height as usize + (height as usize + 1) / 2,
        }
    }

    /// Name of the matching FFmpeg raw pixel format.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Bgra8 => "bgra",
            PixelFormat::Rgba8 => "rgba",
            PixelFormat::Nv12 => "nv12",
        }
    }
}

/// Immutable descriptor of a frame's dimensions and pixel encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatDescription {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl FormatDescription {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
        }
    }

    /// Packed row length of the first plane.
    pub fn row_bytes(&self) -> usize {
        self.pixel_format.row_bytes(self.width)
    }

    /// Bytes needed for a surface with the given stride.
    pub fn surface_len(&self, stride: usize) -> usize {
        stride * self.pixel_format.total_rows(self.height)
    }

    fn ensure_non_empty(&self) -> DualCamResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(DualCamError::InvalidFormat {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

impl fmt::Display for FormatDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {:?}", self.width, self.height, self.pixel_format)
    }
}

/// Stable identity of a pixel surface.
///
/// Pool slots keep their id across leases, so GPU textures cached against it can be
/// reused frame after frame. Standalone buffers get a fresh id each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

static NEXT_SURFACE_ID: AtomicU64 = AtomicU64::new(1);

impl SurfaceId {
    pub(crate) fn next() -> Self {
        SurfaceId(NEXT_SURFACE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Rectangular pixel surface with fixed format and row stride.
pub struct FrameBuffer {
    format: FormatDescription,
    stride: usize,
    data: Vec<u8>,
    surface: SurfaceId,
    lease: Option<SlotLease>,
}

impl FrameBuffer {
    /// Allocate a zeroed, tightly packed buffer.
    pub fn new(format: FormatDescription) -> DualCamResult<Self> {
        Self::with_stride(format, format.row_bytes())
    }

    /// Allocate a zeroed buffer with an explicit row stride.
    pub fn with_stride(format: FormatDescription, stride: usize) -> DualCamResult<Self> {
        format.ensure_non_empty()?;
        if stride < format.row_bytes() {
            return Err(DualCamError::Other(format!(
                "Stride {} shorter than row ({} bytes)",
                stride,
                format.row_bytes()
            )));
        }
        Ok(Self {
            format,
            stride,
            data: vec![0u8; format.surface_len(stride)],
            surface: SurfaceId::next(),
            lease: None,
        })
    }

    /// Wrap existing pixel data (e.g. copied out of a camera callback).
    pub fn from_data(format: FormatDescription, stride: usize, data: Vec<u8>) -> DualCamResult<Self> {
        format.ensure_non_empty()?;
        if stride < format.row_bytes() || data.len() < format.surface_len(stride) {
            return Err(DualCamError::Other(format!(
                "Pixel data too short for {} (stride {}, {} bytes)",
                format,
                stride,
                data.len()
            )));
        }
        Ok(Self {
            format,
            stride,
            data,
            surface: SurfaceId::next(),
            lease: None,
        })
    }

    /// Solid-color buffer for packed 4-byte formats. `color` is in the buffer's own byte order.
    pub fn filled(format: FormatDescription, color: [u8; 4]) -> DualCamResult<Self> {
        if format.pixel_format.bytes_per_pixel() != Some(4) {
            return Err(DualCamError::UnsupportedPixelFormat(format.pixel_format));
        }
        let mut buffer = Self::new(format)?;
        for px in buffer.data.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
        Ok(buffer)
    }

    pub(crate) fn from_slot(
        format: FormatDescription,
        stride: usize,
        data: Vec<u8>,
        surface: SurfaceId,
        lease: SlotLease,
    ) -> Self {
        Self {
            format,
            stride,
            data,
            surface,
            lease: Some(lease),
        }
    }

    pub fn format(&self) -> FormatDescription {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.format.width
    }

    pub fn height(&self) -> u32 {
        self.format.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format.pixel_format
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn surface_id(&self) -> SurfaceId {
        self.surface
    }

    /// Whether this buffer is leased from a pool.
    pub fn is_pooled(&self) -> bool {
        self.lease.is_some()
    }

    /// Read one pixel of a packed 4-byte buffer, in the buffer's byte order.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if self.format.pixel_format.bytes_per_pixel() != Some(4)
            || x >= self.format.width
            || y >= self.format.height
        {
            return None;
        }
        let offset = y as usize * self.stride + x as usize * 4;
        let px = self.data.get(offset..offset + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Pixel rows without stride padding, across all planes.
    pub fn packed_data(&self) -> Cow<'_, [u8]> {
        let row_bytes = self.format.row_bytes();
        let rows = self.format.pixel_format.total_rows(self.format.height);
        if self.stride == row_bytes {
            return Cow::Borrowed(&self.data[..row_bytes * rows]);
        }
        let mut packed = Vec::with_capacity(row_bytes * rows);
        for row in self.data.chunks(self.stride).take(rows) {
            packed.extend_from_slice(&row[..row_bytes]);
        }
        Cow::Owned(packed)
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release(self.surface, std::mem::take(&mut self.data));
        }
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("format", &self.format)
            .field("stride", &self.stride)
            .field("surface", &self.surface)
            .field("pooled", &self.lease.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_sets_every_pixel() {
        let format = FormatDescription::new(4, 2, PixelFormat::Bgra8);
        let buffer = FrameBuffer::filled(format, [1, 2, 3, 255]).unwrap();
        for y in 0..2 {
            for x in 0..4 {
                assert_eq!(buffer.pixel(x, y), Some([1, 2, 3, 255]));
            }
        }
        assert_eq!(buffer.pixel(4, 0), None);
    }

    #[test]
    fn test_zero_sized_format_rejected() {
        let format = FormatDescription::new(0, 10, PixelFormat::Bgra8);
        assert!(matches!(
            FrameBuffer::new(format),
            Err(DualCamError::InvalidFormat { width: 0, .. })
        ));
    }

    #[test]
    fn test_nv12_layout() {
        let format = FormatDescription::new(4, 3, PixelFormat::Nv12);
        let buffer = FrameBuffer::new(format).unwrap();
        // 3 luma rows + 2 chroma rows
        assert_eq!(buffer.data().len(), 4 * 5);
        assert!(FrameBuffer::filled(format, [0; 4]).is_err());
    }

    #[test]
    fn test_packed_data_strips_padding() {
        let format = FormatDescription::new(2, 2, PixelFormat::Rgba8);
        let mut data = vec![0u8; 16 * 2];
        data[..8].copy_from_slice(&[1, 1, 1, 1, 2, 2, 2, 2]);
        data[16..24].copy_from_slice(&[3, 3, 3, 3, 4, 4, 4, 4]);
        let buffer = FrameBuffer::from_data(format, 16, data).unwrap();

        let packed = buffer.packed_data();
        assert_eq!(packed.len(), 16);
        assert_eq!(&packed[8..12], &[3, 3, 3, 3]);
        assert_eq!(buffer.pixel(1, 1), Some([4, 4, 4, 4]));
    }

    #[test]
    fn test_short_data_rejected() {
        let format = FormatDescription::new(2, 2, PixelFormat::Bgra8);
        assert!(FrameBuffer::from_data(format, 8, vec![0u8; 15]).is_err());
    }

    #[test]
    fn test_standalone_buffers_get_distinct_surfaces() {
        let format = FormatDescription::new(2, 2, PixelFormat::Bgra8);
        let a = FrameBuffer::new(format).unwrap();
        let b = FrameBuffer::new(format).unwrap();
        assert_ne!(a.surface_id(), b.surface_id());
        assert!(!a.is_pooled());
    }
}
