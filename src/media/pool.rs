//! Fixed-capacity buffer pool.
//!
//! The pool owns an arena of pre-allocated slots. `acquire` moves a slot's storage
//! into a `FrameBuffer` carrying a lease; dropping that buffer puts the storage back
//! on the free list. When every slot is leased the pool reports exhaustion instead
//! of growing past its retained-count hint.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::frame::{FormatDescription, FrameBuffer, PixelFormat, SurfaceId};
use crate::error::{DualCamError, DualCamResult};

/// Largest edge the pool will allocate for.
pub const MAX_DIMENSION: u32 = 16384;

/// Upper bound on the retained-count hint.
pub const MAX_RETAINED_BUFFERS: usize = 64;

/// Row alignment of pooled buffers. Matches the GPU copy alignment so readbacks land
/// directly in pool storage.
pub const ROW_ALIGNMENT: usize = 256;

/// Encoding of every buffer the pool produces.
pub const POOL_PIXEL_FORMAT: PixelFormat = PixelFormat::Bgra8;

struct Slot {
    index: usize,
    surface: SurfaceId,
    data: Vec<u8>,
}

struct SlotArena {
    free: Vec<Slot>,
    leased: usize,
}

struct PoolShared {
    format: FormatDescription,
    stride: usize,
    capacity: usize,
    arena: Mutex<SlotArena>,
}

impl PoolShared {
    fn return_slot(&self, slot: Slot) {
        let mut arena = self.arena.lock();
        arena.leased = arena.leased.saturating_sub(1);
        arena.free.push(slot);
    }
}

/// Handle a leased buffer holds on its pool slot.
///
/// Weak so buffers outliving a re-prepared pool are simply freed.
pub(crate) struct SlotLease {
    pool: Weak<PoolShared>,
    index: usize,
}

impl SlotLease {
    pub(crate) fn release(self, surface: SurfaceId, data: Vec<u8>) {
        if let Some(pool) = self.pool.upgrade() {
            pool.return_slot(Slot {
                index: self.index,
                surface,
                data,
            });
        }
    }
}

/// Arena of reusable frame buffers of one format.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

/// Allocate a pool matching `input`'s dimensions in the fixed pool encoding.
///
/// Returns the pool together with the description of the buffers it produces.
pub fn allocate_pool(
    input: &FormatDescription,
    retained_count_hint: usize,
) -> DualCamResult<(BufferPool, FormatDescription)> {
    if retained_count_hint == 0 || retained_count_hint > MAX_RETAINED_BUFFERS {
        return Err(DualCamError::InvalidRetainedCount(retained_count_hint));
    }
    if input.width == 0
        || input.height == 0
        || input.width > MAX_DIMENSION
        || input.height > MAX_DIMENSION
    {
        return Err(DualCamError::InvalidFormat {
            width: input.width,
            height: input.height,
        });
    }

    let output = FormatDescription::new(input.width, input.height, POOL_PIXEL_FORMAT);
    let stride = align_up(output.row_bytes(), ROW_ALIGNMENT);
    let len = output.surface_len(stride);

    let free = (0..retained_count_hint)
        .map(|index| Slot {
            index,
            surface: SurfaceId::next(),
            data: vec![0u8; len],
        })
        .collect();

    log::debug!(
        "[POOL] Allocated {} buffers of {} (stride {})",
        retained_count_hint,
        output,
        stride
    );

    let pool = BufferPool {
        shared: Arc::new(PoolShared {
            format: output,
            stride,
            capacity: retained_count_hint,
            arena: Mutex::new(SlotArena { free, leased: 0 }),
        }),
    };
    Ok((pool, output))
}

impl BufferPool {
    /// Take a buffer from the free list, or `None` when every slot is in use.
    pub fn acquire(&self) -> Option<FrameBuffer> {
        let slot = {
            let mut arena = self.shared.arena.lock();
            let slot = arena.free.pop()?;
            arena.leased += 1;
            slot
        };
        let lease = SlotLease {
            pool: Arc::downgrade(&self.shared),
            index: slot.index,
        };
        Some(FrameBuffer::from_slot(
            self.shared.format,
            self.shared.stride,
            slot.data,
            slot.surface,
            lease,
        ))
    }

    /// Description of the buffers this pool produces.
    pub fn format(&self) -> FormatDescription {
        self.shared.format
    }

    pub fn stride(&self) -> usize {
        self.shared.stride
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Slots currently leased out.
    pub fn in_use(&self) -> usize {
        self.shared.arena.lock().leased
    }

    /// Slots ready to be acquired.
    pub fn available(&self) -> usize {
        self.shared.arena.lock().free.len()
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) / alignment * alignment
}
