//! Named 64-bit counters shared between processes.
//!
//! A counters region is two buffers: metadata (state, type id, key, label)
//! and values, one cache-line padded `i64` per counter. The owning process
//! allocates and frees through [`CountersManager`]; monitoring processes map
//! the same regions and iterate with a [`CountersReader`].

mod atomic_counter;
mod clock;
mod layout;
mod manager;
mod reader;

pub use atomic_counter::AtomicCounter;
pub use clock::{EpochClock, SystemEpochClock};
pub use layout::{
    COUNTER_LENGTH, CounterState, DEFAULT_TYPE_ID, MAX_KEY_LENGTH, MAX_LABEL_LENGTH,
    METADATA_LENGTH, NOT_FREE_TO_REUSE,
};
pub use manager::CountersManager;
pub use reader::CountersReader;
