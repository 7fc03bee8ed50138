//! Byte-addressed view over a shared memory region with atomic accessors.
//!
//! An [`AtomicBuffer`] never owns the memory it points at. It is a `Copy`
//! view whose lifetime is tied to whatever does own the bytes: an
//! [`AlignedBuffer`] on the heap, a `&mut [u8]`, or a mapped file.
//!
//! # Access Modes
//!
//! | Method family        | Ordering  | Use                                   |
//! |----------------------|-----------|---------------------------------------|
//! | `get_*` / `put_*`    | Relaxed   | fields guarded by another release     |
//! | `get_*_volatile`     | Acquire   | reading a "data is ready" field       |
//! | `put_*_ordered`      | Release   | publishing a "data is ready" field    |
//! | `compare_and_set_*`  | AcqRel    | claiming space                        |
//! | `get_and_add_*`      | AcqRel    | counters                              |
//!
//! Byte copies (`put_bytes`, `get_bytes`, `put_buffer`) are plain memory
//! copies. They are only race free when a release/acquire pair on a control
//! field orders them, or when the reader validates afterwards the way a
//! broadcast receiver does.
//!
//! Every accessor checks bounds, and every atomic accessor checks natural
//! alignment, so a bad offset panics instead of touching foreign memory.

use crate::bits::CACHE_LINE_LENGTH;
use crate::error::{IpcError, IpcResult};
use std::alloc::{self, Layout};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

/// A view over `len` shared bytes.
#[derive(Clone, Copy)]
pub struct AtomicBuffer<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _marker: PhantomData<&'a [u8]>,
}

// SAFETY: all mutation goes through atomics or raw copies whose ordering is
// the caller's protocol; the view itself carries no thread-local state.
unsafe impl Send for AtomicBuffer<'_> {}
unsafe impl Sync for AtomicBuffer<'_> {}

impl<'a> AtomicBuffer<'a> {
    /// Wraps an exclusively borrowed byte slice.
    pub fn wrap(bytes: &'a mut [u8]) -> Self {
        let len = bytes.len();
        Self {
            // SAFETY: slice pointers are never null
            ptr: unsafe { NonNull::new_unchecked(bytes.as_mut_ptr()) },
            len,
            _marker: PhantomData,
        }
    }

    /// Wraps raw memory, typically a shared mapping.
    ///
    /// # Safety
    /// `ptr` must be non-null and valid for reads and writes of `len` bytes for
    /// the whole of `'a`, and nothing may hold a Rust reference to those bytes
    /// while the view is in use.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Self {
        Self {
            // SAFETY: the caller guarantees a non-null pointer
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            len,
            _marker: PhantomData,
        }
    }

    /// Sub-view of `len` bytes starting at `offset`.
    pub fn view(&self, offset: usize, len: usize) -> AtomicBuffer<'a> {
        self.bounds_check(offset, len);
        Self {
            // SAFETY: bounds checked above
            ptr: unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) },
            len,
            _marker: PhantomData,
        }
    }

    /// Length of the view in bytes.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Fails unless the base address is a multiple of `alignment`.
    pub fn check_alignment(&self, alignment: usize) -> IpcResult<()> {
        let address = self.ptr.as_ptr() as usize;
        if address % alignment != 0 {
            return Err(IpcError::Misaligned { address, alignment });
        }
        Ok(())
    }

    #[inline(always)]
    fn bounds_check(&self, index: usize, length: usize) {
        assert!(
            index.checked_add(length).is_some_and(|end| end <= self.len),
            "index {index} + length {length} out of bounds for buffer of {} bytes",
            self.len
        );
    }

    #[inline(always)]
    fn atomic_i32(&self, index: usize) -> &AtomicI32 {
        self.bounds_check(index, 4);
        // SAFETY: in bounds; alignment asserted before forming the reference
        unsafe {
            let p = self.ptr.as_ptr().add(index);
            assert!(p as usize % 4 == 0, "index {index} is not 4-byte aligned");
            AtomicI32::from_ptr(p as *mut i32)
        }
    }

    #[inline(always)]
    fn atomic_i64(&self, index: usize) -> &AtomicI64 {
        self.bounds_check(index, 8);
        // SAFETY: in bounds; alignment asserted before forming the reference
        unsafe {
            let p = self.ptr.as_ptr().add(index);
            assert!(p as usize % 8 == 0, "index {index} is not 8-byte aligned");
            AtomicI64::from_ptr(p as *mut i64)
        }
    }

    #[inline(always)]
    pub fn get_i32(&self, index: usize) -> i32 {
        self.atomic_i32(index).load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn put_i32(&self, index: usize, value: i32) {
        self.atomic_i32(index).store(value, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn get_i32_volatile(&self, index: usize) -> i32 {
        self.atomic_i32(index).load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn put_i32_ordered(&self, index: usize, value: i32) {
        self.atomic_i32(index).store(value, Ordering::Release);
    }

    #[inline(always)]
    pub fn get_i64(&self, index: usize) -> i64 {
        self.atomic_i64(index).load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn put_i64(&self, index: usize, value: i64) {
        self.atomic_i64(index).store(value, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn get_i64_volatile(&self, index: usize) -> i64 {
        self.atomic_i64(index).load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn put_i64_ordered(&self, index: usize, value: i64) {
        self.atomic_i64(index).store(value, Ordering::Release);
    }

    /// Atomically replaces `expected` with `update`; returns whether it did.
    #[inline(always)]
    pub fn compare_and_set_i64(&self, index: usize, expected: i64, update: i64) -> bool {
        self.atomic_i64(index)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically adds `delta` and returns the previous value.
    #[inline(always)]
    pub fn get_and_add_i64(&self, index: usize, delta: i64) -> i64 {
        self.atomic_i64(index).fetch_add(delta, Ordering::AcqRel)
    }

    /// Copies `src` into the buffer at `index`.
    #[inline]
    pub fn put_bytes(&self, index: usize, src: &[u8]) {
        self.bounds_check(index, src.len());
        // SAFETY: destination in bounds; src cannot overlap a region we only
        // ever expose through raw pointers
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(index), src.len()) };
    }

    /// Copies `dst.len()` bytes starting at `index` into `dst`.
    #[inline]
    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) {
        self.bounds_check(index, dst.len());
        // SAFETY: source in bounds
        unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr().add(index), dst.as_mut_ptr(), dst.len()) };
    }

    /// Copies `length` bytes starting at `index` into a new vector.
    pub fn copy_to_vec(&self, index: usize, length: usize) -> Vec<u8> {
        let mut out = vec![0u8; length];
        self.get_bytes(index, &mut out);
        out
    }

    /// Copies `length` bytes from another buffer. The ranges may overlap.
    #[inline]
    pub fn put_buffer(&self, index: usize, src: &AtomicBuffer<'_>, src_index: usize, length: usize) {
        self.bounds_check(index, length);
        src.bounds_check(src_index, length);
        // SAFETY: both ranges in bounds; `copy` tolerates overlap
        unsafe {
            ptr::copy(
                src.ptr.as_ptr().add(src_index),
                self.ptr.as_ptr().add(index),
                length,
            )
        };
    }

    /// Fills `length` bytes starting at `index` with `value`.
    #[inline]
    pub fn set_memory(&self, index: usize, length: usize, value: u8) {
        self.bounds_check(index, length);
        // SAFETY: in bounds
        unsafe { ptr::write_bytes(self.ptr.as_ptr().add(index), value, length) };
    }

    /// Writes `value` as an `i32` length followed by its UTF-8 bytes,
    /// truncated on a char boundary to at most `max_length` bytes.
    ///
    /// Returns the number of string bytes written.
    pub fn put_string(&self, index: usize, value: &str, max_length: usize) -> usize {
        let mut end = value.len().min(max_length);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        let bytes = &value.as_bytes()[..end];
        self.put_bytes(index + 4, bytes);
        self.put_i32(index, end as i32);
        end
    }

    /// Reads a string written by [`put_string`](Self::put_string).
    ///
    /// Invalid UTF-8 (a torn read) is replaced rather than rejected.
    pub fn get_string(&self, index: usize) -> String {
        let length = self.get_i32(index).max(0) as usize;
        let length = length.min(self.len.saturating_sub(index + 4));
        String::from_utf8_lossy(&self.copy_to_vec(index + 4, length)).into_owned()
    }
}

impl std::fmt::Debug for AtomicBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicBuffer")
            .field("address", &self.ptr)
            .field("capacity", &self.len)
            .finish()
    }
}

/// Zeroed heap memory aligned to two cache lines, for regions shared between
/// threads of one process.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the allocation is only reachable through `AtomicBuffer` views.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocates `len` zeroed bytes.
    ///
    /// # Panics
    /// Panics if `len` is zero.
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "aligned buffer length must be positive");
        let layout = Layout::from_size_align(len, CACHE_LINE_LENGTH * 2)
            .unwrap_or_else(|_| panic!("invalid aligned buffer length {len}"));
        // SAFETY: layout has non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };
        Self { ptr, layout }
    }

    /// A view of the whole allocation.
    pub fn atomic_buffer(&self) -> AtomicBuffer<'_> {
        // SAFETY: the allocation lives as long as the borrow of `self` and is
        // never exposed as a Rust slice
        unsafe { AtomicBuffer::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
