//! Trailer layout of a broadcast log.
//!
//! ```text
//! +-----------------------------+ capacity
//! |  tail intent                | +0
//! |  tail                       | +8
//! |  latest record position     | +16
//! |  padding                    |
//! +-----------------------------+ capacity + 128
//! ```

use crate::bits::CACHE_LINE_LENGTH;

pub const TAIL_INTENT_COUNTER_OFFSET: usize = 0;
pub const TAIL_COUNTER_OFFSET: usize = 8;
pub const LATEST_COUNTER_OFFSET: usize = 16;

/// Total trailer length in bytes.
pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 2;
