//! wgpu device/queue setup.
//!
//! One `GpuContext` is created at startup and shared (`Arc`) with every component
//! that records GPU work, instead of each component fetching its own device.

use std::sync::Arc;

use wgpu::{Device, Queue};

use crate::error::{DualCamError, DualCamResult};

/// GPU device and queue shared by the compositor and its texture cache.
pub struct GpuContext {
    /// wgpu device.
    device: Arc<Device>,
    /// wgpu queue.
    queue: Arc<Queue>,
    /// Limits the device was created with.
    limits: wgpu::Limits,
    /// Adapter description for logging.
    adapter_name: String,
}

impl GpuContext {
    /// Create a context on the best available adapter.
    pub async fn new() -> DualCamResult<Self> {
        Self::with_adapter_options(wgpu::PowerPreference::HighPerformance, false).await
    }

    /// Blocking variant of [`GpuContext::new`] for non-async callers.
    pub fn new_blocking() -> DualCamResult<Self> {
        pollster::block_on(Self::new())
    }

    /// Create a context, optionally forcing the software fallback adapter.
    pub async fn with_adapter_options(
        power_preference: wgpu::PowerPreference,
        force_fallback_adapter: bool,
    ) -> DualCamResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter,
            })
            .await
            .map_err(|e| DualCamError::GpuError(format!("Failed to find GPU adapter: {}", e)))?;

        let info = adapter.get_info();
        if !adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(DualCamError::GpuError(format!(
                "Adapter {} does not support compute shaders",
                info.name
            )));
        }

        log::info!("[GPU] Using adapter: {} ({:?})", info.name, info.backend);

        let limits = wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits());
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("dualcam-mixer"),
                required_features: wgpu::Features::empty(),
                required_limits: limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| DualCamError::GpuError(format!("Failed to create GPU device: {}", e)))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            limits,
            adapter_name: info.name,
        })
    }

    /// Get the wgpu device.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Get the wgpu queue.
    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Compile a WGSL shader module.
    pub fn create_shader(&self, source: &str, label: &str) -> wgpu::ShaderModule {
        self.device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
    }

    /// Block until all submitted work has finished.
    pub fn wait_idle(&self) -> DualCamResult<()> {
        self.device
            .poll(wgpu::PollType::Wait)
            .map(|_| ())
            .map_err(|e| DualCamError::GpuError(format!("Device poll failed: {}", e)))
    }

    /// Run `f` inside a validation error scope, turning captured errors into `GpuError`.
    pub fn validated<T>(&self, label: &str, f: impl FnOnce() -> T) -> DualCamResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(value),
            Some(err) => Err(DualCamError::GpuError(format!("{}: {}", label, err))),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// GPU context for tests.
    ///
    /// Falls back to the software adapter so headless machines still run GPU tests;
    /// `None` only when neither is available.
    pub fn test_gpu() -> Option<Arc<GpuContext>> {
        let hardware = match GpuContext::new_blocking() {
            Ok(gpu) => return Some(Arc::new(gpu)),
            Err(e) => e,
        };
        let software = pollster::block_on(GpuContext::with_adapter_options(
            wgpu::PowerPreference::LowPower,
            true,
        ));
        match software {
            Ok(gpu) => Some(Arc::new(gpu)),
            Err(e) => {
                eprintln!("skipping GPU test: {}; fallback adapter: {}", hardware, e);
                None
            },
        }
    }

    #[test]
    fn test_gpu_context_reports_limits() {
        let Some(gpu) = test_gpu() else { return };
        assert!(gpu.limits().max_texture_dimension_2d >= 2048);
        assert!(gpu.limits().max_compute_invocations_per_workgroup > 0);
    }
}
