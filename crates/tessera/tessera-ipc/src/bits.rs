//! Alignment and position arithmetic shared by the ring buffer and broadcast log.
//!
//! Both buffers keep a data section whose length is a power of two, which
//! turns every wrap-around into a bitmask:
//!
//! ```text
//! capacity = 1024, mask = 1023 (0b11_1111_1111)
//!
//! position =    0 -> index    0
//! position = 1000 -> index 1000
//! position = 1024 -> index    0  (wrapped once)
//! position = 2056 -> index    8  (wrapped twice)
//! ```

use crate::error::{IpcError, IpcResult};

/// Length of a cache line on the platforms we target.
pub const CACHE_LINE_LENGTH: usize = 64;

/// Alignment every region base must honour so 8-byte atomics are valid.
pub const ATOMIC_ALIGNMENT: usize = 8;

/// Round `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two.
///
/// ```
/// use tessera_ipc::align;
/// assert_eq!(align(16, 32), 32);
/// assert_eq!(align(32, 32), 32);
/// assert_eq!(align(33, 32), 64);
/// ```
#[inline(always)]
pub const fn align(value: usize, alignment: usize) -> usize {
    (value + (alignment - 1)) & !(alignment - 1)
}

/// Maps a monotonically increasing position onto an offset in the data section.
#[inline(always)]
pub fn position_to_index(position: i64, mask: i64) -> usize {
    (position & mask) as usize
}

/// Largest data section: record lengths and padding gaps are stored as `i32`.
pub const MAX_CAPACITY: usize = 1 << 30;

/// Checks that a data section capacity is a positive power of two no larger
/// than [`MAX_CAPACITY`].
pub fn check_capacity(capacity: usize) -> IpcResult<()> {
    if !capacity.is_power_of_two() {
        return Err(IpcError::CapacityNotPowerOfTwo { capacity });
    }
    if capacity > MAX_CAPACITY {
        return Err(IpcError::CapacityTooLarge {
            capacity,
            max: MAX_CAPACITY,
        });
    }
    Ok(())
}
