//! Header at the start of every mapped region file.
//!
//! ```text
//! +------------------+ 0
//! | magic   (u64)    |  "TESSERA1", stored last
//! | version (u64)    |
//! | kind    (u64)    |  1 ring buffer, 2 broadcast, 3 counters
//! | primary (u64)    |  length of the first data section
//! | secondary (u64)  |  length of the second data section, or 0
//! | padding          |
//! +------------------+ 128
//! | primary section  |
//! +------------------+ 128 + primary
//! | secondary section|
//! +------------------+
//! ```
//!
//! The creator fills every other field before the release store of `magic`,
//! so a process that observes the magic sees a complete header.

use crate::atomic_buffer::AtomicBuffer;
use crate::bits::CACHE_LINE_LENGTH;

/// ASCII "TESSERA1".
pub const REGION_MAGIC: u64 = 0x5445_5353_4552_4131;

/// Increment on any incompatible layout change.
pub const REGION_VERSION: u64 = 1;

/// Bytes reserved for the header; data sections start here.
pub const REGION_HEADER_LENGTH: usize = CACHE_LINE_LENGTH * 2;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 8;
const KIND_OFFSET: usize = 16;
const PRIMARY_LENGTH_OFFSET: usize = 24;
const SECONDARY_LENGTH_OFFSET: usize = 32;

/// What a mapped region holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    RingBuffer,
    Broadcast,
    /// Metadata as the primary section, values as the secondary.
    Counters,
}

impl RegionKind {
    fn as_raw(self) -> u64 {
        match self {
            Self::RingBuffer => 1,
            Self::Broadcast => 2,
            Self::Counters => 3,
        }
    }

    fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            1 => Some(Self::RingBuffer),
            2 => Some(Self::Broadcast),
            3 => Some(Self::Counters),
            _ => None,
        }
    }
}

/// Decoded copy of a region header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionHeader {
    pub magic: u64,
    pub version: u64,
    pub kind: u64,
    pub primary_length: u64,
    pub secondary_length: u64,
}

impl RegionHeader {
    pub fn new(kind: RegionKind, primary_length: usize, secondary_length: usize) -> Self {
        Self {
            magic: REGION_MAGIC,
            version: REGION_VERSION,
            kind: kind.as_raw(),
            primary_length: primary_length as u64,
            secondary_length: secondary_length as u64,
        }
    }

    /// Bytes a file with this header must have.
    pub fn file_length(&self) -> u64 {
        REGION_HEADER_LENGTH as u64 + self.primary_length + self.secondary_length
    }

    /// Reads a header, loading the magic with Acquire first.
    pub fn read_from(buffer: &AtomicBuffer<'_>) -> Self {
        let magic = buffer.get_i64_volatile(MAGIC_OFFSET) as u64;
        Self {
            magic,
            version: buffer.get_i64(VERSION_OFFSET) as u64,
            kind: buffer.get_i64(KIND_OFFSET) as u64,
            primary_length: buffer.get_i64(PRIMARY_LENGTH_OFFSET) as u64,
            secondary_length: buffer.get_i64(SECONDARY_LENGTH_OFFSET) as u64,
        }
    }

    /// Writes the header, publishing the magic last with Release.
    pub fn write_to(&self, buffer: &AtomicBuffer<'_>) {
        buffer.put_i64(VERSION_OFFSET, self.version as i64);
        buffer.put_i64(KIND_OFFSET, self.kind as i64);
        buffer.put_i64(PRIMARY_LENGTH_OFFSET, self.primary_length as i64);
        buffer.put_i64(SECONDARY_LENGTH_OFFSET, self.secondary_length as i64);
        buffer.put_i64_ordered(MAGIC_OFFSET, self.magic as i64);
    }

    /// Checks the header describes a `kind` region that fits in `file_length`
    /// bytes.
    pub fn validate(&self, kind: RegionKind, file_length: u64) -> Result<(), &'static str> {
        if self.magic != REGION_MAGIC {
            return Err("bad magic");
        }
        if self.version != REGION_VERSION {
            return Err("wrong version");
        }
        match RegionKind::from_raw(self.kind) {
            None => return Err("unknown region kind"),
            Some(k) if k != kind => return Err("region kind mismatch"),
            Some(_) => {}
        }
        let required = self
            .primary_length
            .checked_add(self.secondary_length)
            .and_then(|n| n.checked_add(REGION_HEADER_LENGTH as u64));
        match required {
            Some(n) if n <= file_length => Ok(()),
            _ => Err("file shorter than declared sections"),
        }
    }
}
