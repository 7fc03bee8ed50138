//! Lock-free messaging primitives over shared memory.
//!
//! - [`ManyToOneRingBuffer`]: many producers, one consumer, backpressure
//! - [`BroadcastTransmitter`] / [`BroadcastReceiver`]: one writer, any number
//!   of lossy trailing readers
//! - [`CountersManager`] / [`CountersReader`]: named 64-bit counters for
//!   monitoring
//!
//! Every primitive is a view over an [`AtomicBuffer`], which can come from an
//! [`AlignedBuffer`] for threads of one process or from a [`MappedRegion`] for
//! separate processes.

mod atomic_buffer;
mod bits;
mod error;
mod file_layout;
mod record;
mod region;

pub mod broadcast;
pub mod counters;
pub mod ring_buffer;

pub use atomic_buffer::{AlignedBuffer, AtomicBuffer};
pub use bits::{CACHE_LINE_LENGTH, MAX_CAPACITY, align};
pub use broadcast::{BroadcastReceiver, BroadcastTransmitter, CopyBroadcastReceiver, ReceiverStart};
pub use counters::{AtomicCounter, CountersManager, CountersReader, EpochClock, SystemEpochClock};
pub use error::{IpcError, IpcResult};
pub use file_layout::{REGION_HEADER_LENGTH, RegionHeader, RegionKind};
pub use record::{HEADER_LENGTH, PADDING_MSG_TYPE_ID, RECORD_ALIGNMENT, max_msg_length};
pub use region::MappedRegion;
pub use ring_buffer::{Claim, ManyToOneRingBuffer};
