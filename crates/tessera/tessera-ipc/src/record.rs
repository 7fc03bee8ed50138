//! Record layout shared by the ring buffer and the broadcast log.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +---------------------------------------------------------------+
//! |                            Length                             |
//! +---------------------------------------------------------------+
//! |                            Type Id                            |
//! +---------------------------------------------------------------+
//! |                       Encoded Message                        ...
//! ...                                                             |
//! +---------------------------------------------------------------+
//! ```
//!
//! `Length` covers header and payload. Records start on a
//! [`RECORD_ALIGNMENT`] boundary. These constants are the wire format of a
//! shared region and must match in every participant.

use crate::atomic_buffer::AtomicBuffer;
use crate::bits::{ATOMIC_ALIGNMENT, check_capacity};
use crate::error::{IpcError, IpcResult};

/// Bytes of header in front of every payload.
pub const HEADER_LENGTH: usize = 8;

/// Boundary every record starts on.
pub const RECORD_ALIGNMENT: usize = 32;

/// Type id of a record that only fills the space up to the end of the buffer.
pub const PADDING_MSG_TYPE_ID: i32 = -1;

#[inline(always)]
pub const fn length_offset(record_offset: usize) -> usize {
    record_offset
}

#[inline(always)]
pub const fn type_offset(record_offset: usize) -> usize {
    record_offset + 4
}

#[inline(always)]
pub const fn encoded_msg_offset(record_offset: usize) -> usize {
    record_offset + HEADER_LENGTH
}

/// Largest payload a buffer of `capacity` data bytes accepts: an eighth of it.
#[inline(always)]
pub const fn max_msg_length(capacity: usize) -> usize {
    capacity / 8
}

/// Validates a `data + trailer` region and returns the data capacity.
pub(crate) fn check_region(buffer: &AtomicBuffer<'_>, trailer_length: usize) -> IpcResult<usize> {
    let minimum = trailer_length + RECORD_ALIGNMENT;
    if buffer.capacity() < minimum {
        return Err(IpcError::RegionTooShort {
            required: minimum,
            actual: buffer.capacity(),
        });
    }
    let capacity = buffer.capacity() - trailer_length;
    check_capacity(capacity)?;
    buffer.check_alignment(ATOMIC_ALIGNMENT)?;
    Ok(capacity)
}
