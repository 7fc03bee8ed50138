use memmap2::MmapMut;
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};
use tracing::debug;

/// A file mapped read-write into the address space of this process.
///
/// Every process that maps the same file sees the same bytes, which is what
/// lets the ipc primitives coordinate across process boundaries.
pub struct MappedFile {
    _file: File,
    mmap: MmapMut,
}

impl MappedFile {
    /// Create (or truncate) a file of `size_bytes` zeroed bytes and map it read-write.
    pub fn create<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = %path.display(), size_bytes, "mapped new file");
        Ok(Self { _file: file, mmap })
    }

    /// Open an existing file and map all of it read-write.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = %path.display(), size_bytes = mmap.len(), "mapped existing file");
        Ok(Self { _file: file, mmap })
    }

    /// Raw pointer to the start of the mapping. The mapping is page aligned.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Flush dirty pages back to the file.
    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}
