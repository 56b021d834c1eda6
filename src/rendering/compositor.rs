//! Split-screen compositor.
//!
//! Runs a compute kernel that writes two source textures into the left and right
//! halves of a pooled output buffer. `mix` waits for the GPU and reads the result back
//! before returning, so callers always receive finished pixels.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::gpu::GpuContext;
use super::texture_cache::{TextureCache, TextureHandle, SURFACE_TEXTURE_FORMAT};
use crate::config::MixerConfig;
use crate::error::{DualCamError, DualCamResult};
use crate::media::{allocate_pool, BufferPool, FormatDescription, FrameBuffer};

const SPLIT_SCREEN_SHADER: &str = include_str!("shaders/split_screen.wgsl");

/// Placement of both sources inside the output, in output pixels.
///
/// Layout matches the `MixerParameters` uniform in the kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MixerParameters {
    pub left_position: [f32; 2],
    pub left_size: [f32; 2],
    pub right_position: [f32; 2],
    pub right_size: [f32; 2],
}

impl MixerParameters {
    /// Left source in the left half, right source in the right half, both full height.
    pub fn side_by_side(width: u32, height: u32) -> Self {
        let half = width as f32 / 2.0;
        let height = height as f32;
        Self {
            left_position: [0.0, 0.0],
            left_size: [half, height],
            right_position: [half, 0.0],
            right_size: [half, height],
        }
    }

    /// Whether both regions tile `width` without overlapping.
    pub fn tiles_width(&self, width: u32) -> bool {
        let total = self.left_size[0] + self.right_size[0];
        let left_end = self.left_position[0] + self.left_size[0];
        (total - width as f32).abs() < f32::EPSILON && left_end <= self.right_position[0]
    }
}

/// Compute workgroup dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupSize {
    pub width: u32,
    pub height: u32,
}

impl WorkgroupSize {
    /// Width from the preferred execution width, height from the invocation budget left over.
    pub fn from_limits(limits: &wgpu::Limits, execution_width: u32) -> Self {
        let width = execution_width
            .max(1)
            .min(limits.max_compute_workgroup_size_x.max(1));
        let height = (limits.max_compute_invocations_per_workgroup / width)
            .min(limits.max_compute_workgroup_size_y)
            .max(1);
        Self { width, height }
    }

    /// Groups needed to cover a `width` x `height` output.
    pub fn dispatch_for(&self, width: u32, height: u32) -> (u32, u32) {
        (width.div_ceil(self.width), height.div_ceil(self.height))
    }

    fn shader_source(&self) -> String {
        SPLIT_SCREEN_SHADER
            .replace("{{WORKGROUP_WIDTH}}", &self.width.to_string())
            .replace("{{WORKGROUP_HEIGHT}}", &self.height.to_string())
    }
}

/// Resources owned between `prepare` and `reset`.
struct PreparedState {
    input_format: FormatDescription,
    output_format: FormatDescription,
    pool: BufferPool,
    bridge: TextureCache,
    readback: wgpu::Buffer,
}

/// GPU split-screen mixer.
pub struct Compositor {
    gpu: Arc<GpuContext>,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    workgroup: WorkgroupSize,
    texture_cache_capacity: usize,
    state: Option<PreparedState>,
}

impl Compositor {
    /// Build the compute pipeline. The compositor starts unprepared.
    pub fn new(gpu: Arc<GpuContext>, config: &MixerConfig) -> DualCamResult<Self> {
        let workgroup = WorkgroupSize::from_limits(gpu.limits(), config.thread_execution_width);
        let device = gpu.device();

        let (bind_group_layout, pipeline) = gpu.validated("Mixer pipeline", || {
            let shader = gpu.create_shader(&workgroup.shader_source(), "Split Screen Mixer");

            let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            };

            let bind_group_layout =
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Mixer Bind Group Layout"),
                    entries: &[
                        texture_entry(0),
                        texture_entry(1),
                        wgpu::BindGroupLayoutEntry {
                            binding: 2,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::StorageTexture {
                                access: wgpu::StorageTextureAccess::WriteOnly,
                                format: SURFACE_TEXTURE_FORMAT,
                                view_dimension: wgpu::TextureViewDimension::D2,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 3,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                    ],
                });

            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Mixer Pipeline Layout"),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Mixer Pipeline"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some("main"),
                compilation_options: Default::default(),
                cache: None,
            });

            (bind_group_layout, pipeline)
        })?;

        log::info!(
            "[MIXER] Pipeline ready on {} (workgroup {}x{})",
            gpu.adapter_name(),
            workgroup.width,
            workgroup.height
        );

        Ok(Self {
            gpu,
            pipeline,
            bind_group_layout,
            workgroup,
            texture_cache_capacity: config.texture_cache_capacity,
            state: None,
        })
    }

    /// Allocate the output pool and texture cache for `input`.
    ///
    /// Always resets first. On failure the compositor is left unprepared. Inputs the
    /// texture bridge cannot wrap are rejected here rather than on every `mix`.
    pub fn prepare(
        &mut self,
        input: &FormatDescription,
        retained_count_hint: usize,
    ) -> DualCamResult<FormatDescription> {
        self.reset();

        if !TextureCache::supports(input.pixel_format) {
            log::error!("[MIXER] Unsupported input format {}", input);
            return Err(DualCamError::UnsupportedPixelFormat(input.pixel_format));
        }

        let (pool, output_format) = allocate_pool(input, retained_count_hint).map_err(|e| {
            log::error!("[MIXER] Unable to allocate output pool for {}: {}", input, e);
            e
        })?;

        let max = self.gpu.limits().max_texture_dimension_2d;
        if output_format.width > max || output_format.height > max {
            return Err(DualCamError::InvalidFormat {
                width: output_format.width,
                height: output_format.height,
            });
        }

        let readback = self.gpu.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Mixer Readback Buffer"),
            size: output_format.surface_len(pool.stride()) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let bridge = TextureCache::new(Arc::clone(&self.gpu), self.texture_cache_capacity);

        log::info!(
            "[MIXER] Prepared for {} -> {} ({} buffers)",
            input,
            output_format,
            retained_count_hint
        );

        self.state = Some(PreparedState {
            input_format: *input,
            output_format,
            pool,
            bridge,
            readback,
        });
        Ok(output_format)
    }

    /// Release the pool and texture cache.
    pub fn reset(&mut self) {
        if self.state.take().is_some() {
            log::debug!("[MIXER] Reset");
        }
    }

    pub fn is_prepared(&self) -> bool {
        self.state.is_some()
    }

    pub fn input_format(&self) -> Option<FormatDescription> {
        self.state.as_ref().map(|s| s.input_format)
    }

    /// Description of buffers produced by `mix`, once prepared.
    pub fn output_format(&self) -> Option<FormatDescription> {
        self.state.as_ref().map(|s| s.output_format)
    }

    pub fn workgroup_size(&self) -> WorkgroupSize {
        self.workgroup
    }

    /// Composite `left` and `right` side by side into a pooled buffer.
    ///
    /// Returns `None` when the pool is exhausted or any GPU step fails; the texture
    /// cache is flushed on failure.
    ///
    /// # Panics
    ///
    /// If called before [`Compositor::prepare`].
    pub fn mix(&mut self, left: &FrameBuffer, right: &FrameBuffer) -> Option<FrameBuffer> {
        let gpu: &GpuContext = &self.gpu;
        let pipeline = &self.pipeline;
        let bind_group_layout = &self.bind_group_layout;
        let workgroup = self.workgroup;
        let state = prepared_state(&mut self.state);

        let Some(mut output) = state.pool.acquire() else {
            log::warn!("[MIXER] Allocation failure: output pool exhausted");
            return None;
        };

        let wrapped = (|| -> DualCamResult<[TextureHandle; 3]> {
            Ok([
                state.bridge.wrap(left)?,
                state.bridge.wrap(right)?,
                state.bridge.wrap_output(&output)?,
            ])
        })();
        let [left_tex, right_tex, output_tex] = match wrapped {
            Ok(handles) => handles,
            Err(e) => {
                log::warn!("[MIXER] Failed to create textures: {}", e);
                state.bridge.flush();
                return None;
            },
        };

        let width = output.width();
        let height = output.height();
        let stride = output.stride();
        let params = MixerParameters::side_by_side(width, height);
        let (groups_x, groups_y) = workgroup.dispatch_for(width, height);

        let submitted = gpu.validated("Mixer dispatch", || -> DualCamResult<()> {
            let device = gpu.device();
            let output_texture = state
                .bridge
                .texture(output_tex.surface_id())
                .ok_or_else(|| DualCamError::TextureCacheError("Output texture evicted".into()))?;

            let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mixer Parameters"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Mixer Bind Group"),
                layout: bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(left_tex.view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(right_tex.view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::TextureView(output_tex.view()),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: params_buffer.as_entire_binding(),
                    },
                ],
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Mixer Encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Split Screen Pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups_x, groups_y, 1);
            }

            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: output_texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &state.readback,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(stride as u32),
                        rows_per_image: Some(height),
                    },
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );

            gpu.queue().submit(Some(encoder.finish()));
            Ok(())
        });

        if let Err(e) = submitted.and_then(|inner| inner) {
            log::warn!("[MIXER] GPU dispatch failed: {}", e);
            state.bridge.flush();
            return None;
        }

        if let Err(e) = read_back(gpu, &state.readback, output.data_mut()) {
            log::warn!("[MIXER] Readback failed: {}", e);
            state.bridge.flush();
            return None;
        }

        Some(output)
    }
}

/// Prepared resources.
///
/// # Panics
///
/// If `state` is `None`.
fn prepared_state(state: &mut Option<PreparedState>) -> &mut PreparedState {
    match state {
        Some(state) => state,
        None => panic!("Invalid state: Compositor::mix called before prepare"),
    }
}

/// Wait for the GPU and copy the mapped readback buffer into `dest`.
fn read_back(gpu: &GpuContext, buffer: &wgpu::Buffer, dest: &mut [u8]) -> DualCamResult<()> {
    let slice = buffer.slice(..);
    let (tx, rx) = crossbeam_channel::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    if let Err(e) = gpu.wait_idle() {
        // Cancels the pending map so the next mix can map the buffer again.
        buffer.unmap();
        return Err(e);
    }

    match rx.recv() {
        Ok(Ok(())) => {},
        Ok(Err(e)) => return Err(DualCamError::GpuError(format!("Map failed: {}", e))),
        Err(_) => return Err(DualCamError::GpuError("Map callback dropped".into())),
    }

    {
        let mapped = slice.get_mapped_range();
        let len = mapped.len().min(dest.len());
        dest[..len].copy_from_slice(&mapped[..len]);
    }
    buffer.unmap();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use super::*;
    use crate::media::PixelFormat;
    use crate::rendering::gpu::test_support::test_gpu;

    const LEFT: [u8; 4] = [255, 0, 0, 255];
    const RIGHT: [u8; 4] = [0, 0, 255, 255];

    fn compositor() -> Option<Compositor> {
        let gpu = test_gpu()?;
        Some(Compositor::new(gpu, &MixerConfig::default()).unwrap())
    }

    #[test]
    fn test_side_by_side_parameters() {
        let params = MixerParameters::side_by_side(1280, 720);
        assert_eq!(params.left_position, [0.0, 0.0]);
        assert_eq!(params.left_size, [640.0, 720.0]);
        assert_eq!(params.right_position, [640.0, 0.0]);
        assert_eq!(params.right_size, [640.0, 720.0]);
        assert!(params.tiles_width(1280));
        assert_eq!(std::mem::size_of::<MixerParameters>(), 32);
    }

    #[test]
    fn test_workgroup_from_limits() {
        let limits = wgpu::Limits::default();
        let size = WorkgroupSize::from_limits(&limits, 32);
        assert_eq!(size.width, 32);
        assert_eq!(size.height, limits.max_compute_invocations_per_workgroup / 32);

        let clamped = WorkgroupSize::from_limits(&limits, 4096);
        assert_eq!(clamped.width, limits.max_compute_workgroup_size_x);
        assert!(clamped.height >= 1);
    }

    #[test]
    fn test_dispatch_covers_output() {
        let size = WorkgroupSize {
            width: 32,
            height: 8,
        };
        assert_eq!(size.dispatch_for(64, 16), (2, 2));
        assert_eq!(size.dispatch_for(65, 17), (3, 3));
        assert_eq!(size.dispatch_for(1, 1), (1, 1));
    }

    #[test]
    fn test_shader_source_has_no_placeholders() {
        let source = WorkgroupSize {
            width: 16,
            height: 4,
        }
        .shader_source();
        assert!(source.contains("@workgroup_size(16, 4, 1)"));
        assert!(!source.contains("{{"));
    }

    #[test]
    fn test_unprepared_state_panics() {
        let mut state: Option<PreparedState> = None;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            prepared_state(&mut state);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_mix_without_prepare_panics() {
        let Some(mut compositor) = compositor() else { return };
        let format = FormatDescription::new(8, 4, PixelFormat::Bgra8);
        let left = FrameBuffer::filled(format, LEFT).unwrap();
        let right = FrameBuffer::filled(format, RIGHT).unwrap();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            compositor.mix(&left, &right);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_prepare_is_idempotent_and_reset_unprepares() {
        let Some(mut compositor) = compositor() else { return };
        let format = FormatDescription::new(64, 32, PixelFormat::Bgra8);

        let first = compositor.prepare(&format, 3).unwrap();
        let second = compositor.prepare(&format, 3).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.pixel_format, PixelFormat::Bgra8);
        assert_eq!(compositor.input_format(), Some(format));

        compositor.reset();
        assert!(!compositor.is_prepared());
        assert_eq!(compositor.output_format(), None);
    }

    #[test]
    fn test_failed_prepare_leaves_unprepared() {
        let Some(mut compositor) = compositor() else { return };
        let format = FormatDescription::new(64, 32, PixelFormat::Bgra8);
        compositor.prepare(&format, 2).unwrap();

        assert!(compositor.prepare(&format, 0).is_err());
        assert!(!compositor.is_prepared());
    }

    fn assert_split(output: &FrameBuffer, left: impl Fn(u32) -> [u8; 4], right: [u8; 4]) {
        let (width, height) = (output.width(), output.height());
        for y in 0..height {
            for x in 0..width {
                let expected = if x < width / 2 { left(y) } else { right };
                assert_eq!(
                    output.pixel(x, y),
                    Some(expected),
                    "{}x{} pixel ({}, {})",
                    width,
                    height,
                    x,
                    y
                );
            }
        }
    }

    #[test]
    fn test_mix_produces_split_screen() {
        let Some(mut compositor) = compositor() else { return };

        for (width, height) in [(64, 16), (2, 2), (30, 10), (128, 6), (96, 54)] {
            let format = FormatDescription::new(width, height, PixelFormat::Bgra8);
            let output_format = compositor.prepare(&format, 2).unwrap();

            let left = FrameBuffer::filled(format, LEFT).unwrap();
            let right = FrameBuffer::filled(format, RIGHT).unwrap();
            let output = compositor.mix(&left, &right).expect("mix output");

            assert_eq!(output.format(), output_format);
            assert_eq!(output.pixel_format(), PixelFormat::Bgra8);
            assert_eq!((output.width(), output.height()), (width, height));
            assert_split(&output, |_| LEFT, RIGHT);
        }
    }

    #[test]
    fn test_mix_scales_sources_of_other_sizes() {
        const LEFT_LOW: [u8; 4] = [0, 255, 0, 255];
        let Some(mut compositor) = compositor() else { return };
        let format = FormatDescription::new(64, 16, PixelFormat::Bgra8);
        compositor.prepare(&format, 2).unwrap();

        // Top half LEFT, bottom half LEFT_LOW, at half the output height.
        let left_format = FormatDescription::new(32, 8, PixelFormat::Bgra8);
        let mut left = FrameBuffer::filled(left_format, LEFT).unwrap();
        let stride = left.stride();
        for row in left.data_mut().chunks_mut(stride).skip(4).take(4) {
            for px in row[..32 * 4].chunks_exact_mut(4) {
                px.copy_from_slice(&LEFT_LOW);
            }
        }
        let right =
            FrameBuffer::filled(FormatDescription::new(96, 40, PixelFormat::Bgra8), RIGHT).unwrap();

        let output = compositor.mix(&left, &right).expect("mix output");
        assert_eq!((output.width(), output.height()), (64, 16));
        assert_split(&output, |y| if y < 8 { LEFT } else { LEFT_LOW }, RIGHT);
    }

    #[test]
    fn test_mix_fails_when_pool_exhausted() {
        let Some(mut compositor) = compositor() else { return };
        let format = FormatDescription::new(16, 8, PixelFormat::Bgra8);
        compositor.prepare(&format, 1).unwrap();
        let left = FrameBuffer::filled(format, LEFT).unwrap();
        let right = FrameBuffer::filled(format, RIGHT).unwrap();

        let held = compositor.mix(&left, &right).expect("first mix");
        assert!(compositor.mix(&left, &right).is_none());
        drop(held);
        assert!(compositor.mix(&left, &right).is_some());
    }

    #[test]
    fn test_prepare_rejects_formats_the_bridge_cannot_wrap() {
        let Some(mut compositor) = compositor() else { return };
        let supported = FormatDescription::new(16, 8, PixelFormat::Bgra8);
        compositor.prepare(&supported, 2).unwrap();

        for pixel_format in [PixelFormat::Nv12, PixelFormat::Rgba8] {
            let format = FormatDescription::new(16, 8, pixel_format);
            assert!(matches!(
                compositor.prepare(&format, 2),
                Err(DualCamError::UnsupportedPixelFormat(f)) if f == pixel_format
            ));
            assert!(!compositor.is_prepared());
        }
    }

    #[test]
    fn test_readback_buffer_reusable_after_cancelled_map() {
        let Some(gpu) = test_gpu() else { return };
        let buffer = gpu.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("Test Readback"),
            size: 256,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        // Same recovery as a failed wait: abandon a pending map, then read again.
        buffer.slice(..).map_async(wgpu::MapMode::Read, |_| {});
        buffer.unmap();

        let mut dest = vec![1u8; 256];
        read_back(&gpu, &buffer, &mut dest).unwrap();
        assert!(dest.iter().all(|&b| b == 0));
    }
}
