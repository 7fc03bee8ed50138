//! Counter metadata and value layout.
//!
//! Counter `id` owns metadata entry `id` and value entry `id`:
//!
//! ```text
//! metadata entry (512 bytes)              value entry (128 bytes)
//! +-------------------------------+ 0     +-------------------------+ 0
//! | state: i32                    |       | value: i64              |
//! | type id: i32                  | 4     | padding                 |
//! | free for reuse deadline: i64  | 8     +-------------------------+ 128
//! | key (112 bytes)               | 16
//! | label length: i32             | 128
//! | label (380 bytes, UTF-8)      | 132
//! +-------------------------------+ 512
//! ```

use crate::bits::CACHE_LINE_LENGTH;

/// Bytes of metadata per counter.
pub const METADATA_LENGTH: usize = 512;

/// Bytes of value storage per counter; two cache lines so neighbours do not
/// false-share.
pub const COUNTER_LENGTH: usize = CACHE_LINE_LENGTH * 2;

pub const TYPE_ID_OFFSET: usize = 4;
pub const FREE_FOR_REUSE_DEADLINE_OFFSET: usize = 8;
pub const KEY_OFFSET: usize = 16;
pub const LABEL_OFFSET: usize = KEY_OFFSET + MAX_KEY_LENGTH;

pub const MAX_KEY_LENGTH: usize = 112;
pub const MAX_LABEL_LENGTH: usize = METADATA_LENGTH - LABEL_OFFSET - 4;

pub const RECORD_UNUSED: i32 = 0;
pub const RECORD_ALLOCATED: i32 = 1;
pub const RECORD_RECLAIMED: i32 = -1;

/// Deadline stored while a counter is allocated.
pub const NOT_FREE_TO_REUSE: i64 = i64::MAX;

/// Type id of counters allocated without one.
pub const DEFAULT_TYPE_ID: i32 = 0;

/// Metadata region must be at least this many times the values region.
pub const METADATA_TO_VALUES_RATIO: usize = METADATA_LENGTH / COUNTER_LENGTH;

/// Lifecycle of a counter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterState {
    /// Never allocated.
    Unused,
    Allocated,
    /// Freed and waiting for its reuse deadline.
    Reclaimed,
}

impl CounterState {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            RECORD_UNUSED => Some(Self::Unused),
            RECORD_ALLOCATED => Some(Self::Allocated),
            RECORD_RECLAIMED => Some(Self::Reclaimed),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::Unused => RECORD_UNUSED,
            Self::Allocated => RECORD_ALLOCATED,
            Self::Reclaimed => RECORD_RECLAIMED,
        }
    }
}

#[inline(always)]
pub const fn metadata_offset(id: i32) -> usize {
    id as usize * METADATA_LENGTH
}

#[inline(always)]
pub const fn counter_offset(id: i32) -> usize {
    id as usize * COUNTER_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_fills_rest_of_metadata_entry() {
        assert_eq!(LABEL_OFFSET, 128);
        assert_eq!(MAX_LABEL_LENGTH, 380);
        assert_eq!(METADATA_TO_VALUES_RATIO, 4);
    }

    #[test]
    fn state_round_trips_through_raw_value() {
        for state in [
            CounterState::Unused,
            CounterState::Allocated,
            CounterState::Reclaimed,
        ] {
            assert_eq!(CounterState::from_raw(state.as_raw()), Some(state));
        }
        assert_eq!(CounterState::from_raw(7), None);
    }
}
