//! Error types for the ipc primitives.
//!
//! Only construction, caller mistakes and resource exhaustion surface here.
//! Ring buffer backpressure and torn broadcast reads are ordinary return
//! values on the hot path and never become an `IpcError`.

use thiserror::Error;

/// Errors raised by region construction and the non hot-path operations.
#[derive(Error, Debug)]
pub enum IpcError {
    /// Data section length is not a power of two.
    #[error("capacity must be a positive power of two: {capacity}")]
    CapacityNotPowerOfTwo {
        /// Offending capacity in bytes
        capacity: usize,
    },

    /// Data section too large for the 32-bit record lengths.
    #[error("capacity {capacity} exceeds maximum of {max}")]
    CapacityTooLarge {
        /// Offending capacity in bytes
        capacity: usize,
        /// Largest supported capacity
        max: usize,
    },

    /// Supplied region cannot hold the required layout.
    #[error("region too short: {required} bytes required, {actual} supplied")]
    RegionTooShort {
        /// Bytes required
        required: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// Region base address cannot host 8-byte atomics.
    #[error("region address {address:#x} not aligned to {alignment}")]
    Misaligned {
        /// Base address
        address: usize,
        /// Required alignment
        alignment: usize,
    },

    /// A mapped file does not carry a usable header.
    #[error("invalid region header: {0}")]
    InvalidRegionHeader(&'static str),

    /// Message is larger than the buffer accepts.
    #[error("message length {length} exceeds maximum {max}")]
    MessageTooLong {
        /// Payload length
        length: usize,
        /// Maximum payload length
        max: usize,
    },

    /// Application type ids must be at least 1.
    #[error("type id must be positive: {type_id}")]
    InvalidTypeId {
        /// Offending type id
        type_id: i32,
    },

    /// Every counter slot is in use or waiting out its reuse deadline.
    #[error("no counter slot available, max counter id {max}")]
    CountersExhausted {
        /// Highest counter id the region can hold
        max: i32,
    },

    /// Counter id outside the region.
    #[error("counter id {id} out of range 0..={max}")]
    CounterIdOutOfRange {
        /// Offending id
        id: i32,
        /// Highest valid id
        max: i32,
    },

    /// Counter id is not currently allocated.
    #[error("counter {id} is not allocated")]
    CounterNotAllocated {
        /// Offending id
        id: i32,
    },

    /// Broadcast receiver was lapped or read a torn record.
    #[error("unable to keep up with broadcast")]
    UnableToKeepUp,

    /// Copy receiver scratch buffer cannot hold a record.
    #[error("scratch buffer too small: {required} bytes required, capacity {capacity}")]
    ScratchBufferTooSmall {
        /// Payload length of the record
        required: usize,
        /// Scratch buffer capacity
        capacity: usize,
    },

    /// IO error while mapping a region file.
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },
}

/// Result type for ipc operations
pub type IpcResult<T> = Result<T, IpcError>;
