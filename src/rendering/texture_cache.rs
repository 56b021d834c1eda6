//! GPU texture bridge for frame buffers.
//!
//! Each pixel surface gets one GPU texture, cached by `SurfaceId` so pooled buffers
//! reuse their texture every time the slot comes around. Source surfaces are uploaded
//! on every wrap; output surfaces are only written by the compute pass.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::gpu::GpuContext;
use crate::error::{DualCamError, DualCamResult};
use crate::media::{FrameBuffer, PixelFormat, SurfaceId};

/// Texture format used for BGRA surfaces.
///
/// The kernel only moves texels, so storing BGRA bytes in an RGBA texture keeps the
/// byte order intact end to end.
pub const SURFACE_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

const SURFACE_TEXTURE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::STORAGE_BINDING)
    .union(wgpu::TextureUsages::COPY_DST)
    .union(wgpu::TextureUsages::COPY_SRC);

struct CachedTexture {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

/// GPU-visible view over a frame buffer's surface, valid for one mixing pass.
pub struct TextureHandle {
    surface: SurfaceId,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl TextureHandle {
    pub fn surface_id(&self) -> SurfaceId {
        self.surface
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// LRU cache of surface textures.
pub struct TextureCache {
    gpu: Arc<GpuContext>,
    entries: LruCache<SurfaceId, CachedTexture>,
}

impl TextureCache {
    pub fn new(gpu: Arc<GpuContext>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            gpu,
            entries: LruCache::new(capacity),
        }
    }

    /// Wrap a source buffer, uploading its current pixels.
    pub fn wrap(&mut self, frame: &FrameBuffer) -> DualCamResult<TextureHandle> {
        let handle = self.texture_for(frame)?;
        let cached = self
            .entries
            .peek(&handle.surface)
            .ok_or_else(|| DualCamError::TextureCacheError("Entry evicted during wrap".into()))?;

        self.gpu.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &cached.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            frame.data(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.stride() as u32),
                rows_per_image: Some(frame.height()),
            },
            extent(frame.width(), frame.height()),
        );

        Ok(handle)
    }

    /// Wrap a destination buffer. Its current pixels are not uploaded.
    pub fn wrap_output(&mut self, frame: &FrameBuffer) -> DualCamResult<TextureHandle> {
        self.texture_for(frame)
    }

    /// Texture backing `surface`, if cached.
    pub fn texture(&self, surface: SurfaceId) -> Option<&wgpu::Texture> {
        self.entries.peek(&surface).map(|entry| &entry.texture)
    }

    /// Drop every cached texture.
    pub fn flush(&mut self) {
        if !self.entries.is_empty() {
            log::debug!("[GPU] Flushing {} cached textures", self.entries.len());
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether surfaces in `format` can be wrapped.
    pub fn supports(format: PixelFormat) -> bool {
        format == PixelFormat::Bgra8
    }

    fn texture_for(&mut self, frame: &FrameBuffer) -> DualCamResult<TextureHandle> {
        if !Self::supports(frame.pixel_format()) {
            return Err(DualCamError::TextureCacheError(format!(
                "Cannot wrap {:?} surface, expected Bgra8",
                frame.pixel_format()
            )));
        }
        let (width, height) = (frame.width(), frame.height());
        let max = self.gpu.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(DualCamError::TextureCacheError(format!(
                "{}x{} exceeds GPU texture limit {}",
                width, height, max
            )));
        }

        let surface = frame.surface_id();
        let reusable = matches!(
            self.entries.get(&surface),
            Some(entry) if entry.width == width && entry.height == height
        );
        if !reusable {
            let texture = self
                .gpu
                .device()
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some("Surface Texture"),
                    size: extent(width, height),
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: SURFACE_TEXTURE_FORMAT,
                    usage: SURFACE_TEXTURE_USAGE,
                    view_formats: &[],
                });
            if let Some((evicted, _)) = self.entries.push(
                surface,
                CachedTexture {
                    texture,
                    width,
                    height,
                },
            ) {
                if evicted != surface {
                    log::trace!("[GPU] Evicted texture for {:?}", evicted);
                }
            }
        }

        let entry = self
            .entries
            .peek(&surface)
            .ok_or_else(|| DualCamError::TextureCacheError("Texture missing after insert".into()))?;
        Ok(TextureHandle {
            surface,
            view: entry
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default()),
            width,
            height,
        })
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::FormatDescription;
    use crate::rendering::gpu::test_support::test_gpu;

    #[test]
    fn test_rejects_non_bgra_surfaces() {
        let Some(gpu) = test_gpu() else { return };
        let mut cache = TextureCache::new(gpu, 4);

        let nv12 = FrameBuffer::new(FormatDescription::new(8, 8, PixelFormat::Nv12)).unwrap();
        assert!(matches!(
            cache.wrap(&nv12),
            Err(DualCamError::TextureCacheError(_))
        ));
        let rgba = FrameBuffer::new(FormatDescription::new(8, 8, PixelFormat::Rgba8)).unwrap();
        assert!(cache.wrap(&rgba).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reuses_texture_per_surface_and_flushes() {
        let Some(gpu) = test_gpu() else { return };
        let mut cache = TextureCache::new(gpu, 2);
        let format = FormatDescription::new(8, 4, PixelFormat::Bgra8);
        let a = FrameBuffer::filled(format, [1, 2, 3, 255]).unwrap();
        let b = FrameBuffer::filled(format, [4, 5, 6, 255]).unwrap();

        let first = cache.wrap(&a).unwrap();
        assert_eq!((first.width(), first.height()), (8, 4));
        cache.wrap(&a).unwrap();
        assert_eq!(cache.len(), 1);
        cache.wrap_output(&b).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.texture(a.surface_id()).is_some());

        // Capacity 2: a third surface evicts the least recently used one.
        let c = FrameBuffer::filled(format, [7, 8, 9, 255]).unwrap();
        cache.wrap(&c).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.texture(a.surface_id()).is_none());

        cache.flush();
        assert!(cache.is_empty());
    }
}
