//! Media primitives shared by the mixer and the recorder.
//!
//! - `frame`: pixel surfaces and their format descriptions
//! - `pool`: fixed-capacity arena of reusable frame buffers
//! - `audio`: interleaved PCM buffers
//! - `time`: presentation timestamps

pub mod audio;
pub mod frame;
pub mod pool;
pub mod time;

pub use audio::AudioBuffer;
pub use frame::{FormatDescription, FrameBuffer, PixelFormat, SurfaceId};
pub use pool::{allocate_pool, BufferPool};
pub use time::Timestamp;
