//! Region files shared between processes.
//!
//! A [`MappedRegion`] maps a file carrying a [`RegionHeader`] and hands out
//! [`AtomicBuffer`] views of its data sections, ready to be wrapped by a ring
//! buffer, a broadcast transmitter or receiver, or a counters manager.

use crate::atomic_buffer::AtomicBuffer;
use crate::bits::check_capacity;
use crate::counters::{COUNTER_LENGTH, METADATA_LENGTH};
use crate::error::{IpcError, IpcResult};
use crate::file_layout::{REGION_HEADER_LENGTH, RegionHeader, RegionKind};
use crate::{broadcast, ring_buffer};
use std::path::Path;
use tessera_mmap::MappedFile;
use tracing::info;

/// A mapped region file.
///
/// Views returned by [`primary`](Self::primary) and
/// [`secondary`](Self::secondary) borrow the region, so the mapping outlives
/// every primitive built on it.
pub struct MappedRegion {
    /// Owns the mapping; only accessed through `base`.
    _file: MappedFile,
    base: *mut u8,
    kind: RegionKind,
    primary_length: usize,
    secondary_length: usize,
}

// SAFETY: the mapping is process-wide shared memory and is only touched
// through `AtomicBuffer` views.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Creates (or truncates) a ring buffer file with `capacity` data bytes.
    pub fn create_ring_buffer<P: AsRef<Path>>(path: P, capacity: usize) -> IpcResult<Self> {
        check_capacity(capacity)?;
        Self::create(
            path.as_ref(),
            RegionKind::RingBuffer,
            capacity + ring_buffer::TRAILER_LENGTH,
            0,
        )
    }

    /// Creates (or truncates) a broadcast log file with `capacity` data bytes.
    pub fn create_broadcast<P: AsRef<Path>>(path: P, capacity: usize) -> IpcResult<Self> {
        check_capacity(capacity)?;
        Self::create(
            path.as_ref(),
            RegionKind::Broadcast,
            capacity + broadcast::TRAILER_LENGTH,
            0,
        )
    }

    /// Creates (or truncates) a counters file with room for `max_counters`.
    pub fn create_counters<P: AsRef<Path>>(path: P, max_counters: usize) -> IpcResult<Self> {
        if max_counters == 0 {
            return Err(IpcError::RegionTooShort {
                required: COUNTER_LENGTH,
                actual: 0,
            });
        }
        Self::create(
            path.as_ref(),
            RegionKind::Counters,
            max_counters * METADATA_LENGTH,
            max_counters * COUNTER_LENGTH,
        )
    }

    fn create(
        path: &Path,
        kind: RegionKind,
        primary_length: usize,
        secondary_length: usize,
    ) -> IpcResult<Self> {
        let header = RegionHeader::new(kind, primary_length, secondary_length);
        let mut file = MappedFile::create(path, header.file_length())?;
        let base = file.as_mut_ptr();

        // SAFETY: the mapping is at least one header long and page aligned
        let header_view = unsafe { AtomicBuffer::from_raw_parts(base, REGION_HEADER_LENGTH) };
        header.write_to(&header_view);

        info!(path = %path.display(), ?kind, primary_length, secondary_length, "region created");
        Ok(Self {
            _file: file,
            base,
            kind,
            primary_length,
            secondary_length,
        })
    }

    /// Maps an existing region file and checks it holds a `kind` region.
    ///
    /// # Errors
    /// - `Io` if the file cannot be opened or mapped
    /// - `InvalidRegionHeader` if the header is missing, of another kind or
    ///   version, or declares more bytes than the file has
    pub fn open<P: AsRef<Path>>(path: P, kind: RegionKind) -> IpcResult<Self> {
        let path = path.as_ref();
        let mut file = MappedFile::open(path)?;
        if file.len() < REGION_HEADER_LENGTH {
            return Err(IpcError::InvalidRegionHeader("file shorter than header"));
        }
        let base = file.as_mut_ptr();

        // SAFETY: length checked above
        let header_view = unsafe { AtomicBuffer::from_raw_parts(base, REGION_HEADER_LENGTH) };
        let header = RegionHeader::read_from(&header_view);
        header
            .validate(kind, file.len() as u64)
            .map_err(IpcError::InvalidRegionHeader)?;

        info!(path = %path.display(), ?kind, "region opened");
        Ok(Self {
            _file: file,
            base,
            kind,
            primary_length: header.primary_length as usize,
            secondary_length: header.secondary_length as usize,
        })
    }

    #[inline]
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// The first data section: the whole ring buffer or broadcast log, or the
    /// counters metadata.
    pub fn primary(&self) -> AtomicBuffer<'_> {
        // SAFETY: the header was validated against the mapping length, and
        // the view cannot outlive `self`
        unsafe {
            AtomicBuffer::from_raw_parts(self.base.add(REGION_HEADER_LENGTH), self.primary_length)
        }
    }

    /// The second data section: the counters values. Empty for other kinds.
    pub fn secondary(&self) -> AtomicBuffer<'_> {
        // SAFETY: as for `primary`
        unsafe {
            AtomicBuffer::from_raw_parts(
                self.base.add(REGION_HEADER_LENGTH + self.primary_length),
                self.secondary_length,
            )
        }
    }
}
