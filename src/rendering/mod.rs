//! GPU compositing and overlay rendering.
//!
//! ## Components
//! - `gpu`: wgpu device/queue shared by every GPU consumer
//! - `texture_cache`: frame buffer to texture bridge with an LRU cache
//! - `compositor`: split-screen compute pipeline
//! - `overlay`: telemetry text overlay drawn with resvg

pub mod compositor;
pub mod gpu;
pub mod overlay;
pub mod texture_cache;

pub use compositor::{Compositor, MixerParameters, WorkgroupSize};
pub use gpu::GpuContext;
pub use overlay::OverlayRenderer;
pub use texture_cache::{TextureCache, TextureHandle};
