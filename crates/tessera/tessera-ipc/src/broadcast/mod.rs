//! Single-writer, many-reader broadcast log over a shared region.
//!
//! The transmitter never waits for readers. Each receiver trails it at its own
//! pace and detects when it has been lapped or when a record it is reading
//! was overwritten underneath it.
//!
//! # Protocol
//! 1. Transmitter stores the tail it is about to reach (tail intent), then
//!    fences so the intent is visible before any record byte changes
//! 2. Transmitter writes padding (if wrapping), header and payload
//! 3. Transmitter records the record start as `latest` and release-stores
//!    the new tail
//! 4. Receiver acquire-loads the tail, reads the record in place, then checks
//!    the tail intent is still less than one capacity ahead of its cursor

mod copy_receiver;
mod descriptor;
mod receiver;
mod transmitter;

pub use copy_receiver::CopyBroadcastReceiver;
pub use descriptor::{
    LATEST_COUNTER_OFFSET, TAIL_COUNTER_OFFSET, TAIL_INTENT_COUNTER_OFFSET, TRAILER_LENGTH,
};
pub use receiver::{BroadcastReceiver, ReceiverStart};
pub use transmitter::BroadcastTransmitter;
