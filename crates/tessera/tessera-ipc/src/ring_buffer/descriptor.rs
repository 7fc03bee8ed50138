//! Trailer layout of a many-to-one ring buffer.
//!
//! The trailer follows the data section. Each field sits on its own pair of
//! cache lines so producers hammering `tail` do not false-share with the
//! consumer publishing `head`.
//!
//! ```text
//! +-----------------------------+ 0
//! |        data section         |
//! |     (capacity bytes)        |
//! +-----------------------------+ capacity
//! |  padding                    |
//! +-----------------------------+ capacity + 128
//! |  tail position              |
//! +-----------------------------+ capacity + 256
//! |  head cache position        |
//! +-----------------------------+ capacity + 384
//! |  head position              |
//! +-----------------------------+ capacity + 512
//! |  correlation id counter     |
//! +-----------------------------+ capacity + 640
//! |  consumer heartbeat (ms)    |
//! +-----------------------------+ capacity + 768
//! ```

use crate::bits::CACHE_LINE_LENGTH;

pub const TAIL_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 2;
pub const HEAD_CACHE_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 4;
pub const HEAD_POSITION_OFFSET: usize = CACHE_LINE_LENGTH * 6;
pub const CORRELATION_COUNTER_OFFSET: usize = CACHE_LINE_LENGTH * 8;
pub const CONSUMER_HEARTBEAT_OFFSET: usize = CACHE_LINE_LENGTH * 10;

/// Total trailer length in bytes.
pub const TRAILER_LENGTH: usize = CACHE_LINE_LENGTH * 12;
