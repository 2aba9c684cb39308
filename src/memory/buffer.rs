use crate::core::platform::CACHE_LINE_SIZE;
use crate::memory::aligned::{aligned_free, try_aligned_malloc, AllocError};
use std::alloc::{handle_alloc_error, Layout};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use tracing::trace;

/// A growable byte buffer whose storage always starts on an `alignment`
/// boundary, so SIMD loads of any element type up to that alignment can use
/// the aligned instruction forms.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    capacity: usize,
    alignment: usize,
}

unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Empty buffer aligned to [`CACHE_LINE_SIZE`], no allocation.
    pub fn new() -> AlignedBuffer {
        Self::with_capacity_and_alignment(0, CACHE_LINE_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> AlignedBuffer {
        Self::with_capacity_and_alignment(capacity, CACHE_LINE_SIZE)
    }

    /// # Panics
    ///
    /// If `alignment` is not a power of two.
    pub fn with_capacity_and_alignment(capacity: usize, alignment: usize) -> AlignedBuffer {
        assert!(
            alignment.is_power_of_two(),
            "alignment {alignment} is not a power of two"
        );
        let mut buf = AlignedBuffer {
            ptr: dangling(alignment),
            len: 0,
            capacity: 0,
            alignment,
        };
        if capacity > 0 {
            buf.realloc_or_abort(capacity);
        }
        buf
    }

    pub fn zeroed(len: usize) -> AlignedBuffer {
        let mut buf = Self::with_capacity(len);
        buf.resize(len, 0);
        buf
    }

    pub fn copy_from_slice(data: &[u8]) -> AlignedBuffer {
        let mut buf = Self::with_capacity(data.len());
        buf.extend_from_slice(data);
        buf
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Reserve room for `additional` more bytes, aborting on allocation
    /// failure like `Vec` does.
    pub fn reserve(&mut self, additional: usize) {
        if let Err(err) = self.try_reserve(additional) {
            match err {
                AllocError::OutOfMemory { size, align } => match Layout::from_size_align(size, align) {
                    Ok(layout) => handle_alloc_error(layout),
                    Err(_) => panic!("capacity overflow"),
                },
                AllocError::InvalidAlignment(_) => unreachable!("alignment checked at construction"),
            }
        }
    }

    pub fn try_reserve(&mut self, additional: usize) -> Result<(), AllocError> {
        let required = self.len.checked_add(additional).ok_or(AllocError::OutOfMemory {
            size: usize::MAX,
            align: self.alignment,
        })?;
        if required <= self.capacity {
            return Ok(());
        }
        let new_capacity = required.max(self.capacity.saturating_mul(2));
        self.realloc(new_capacity)
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.reserve(data.len());
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(self.len), data.len());
        }
        self.len += data.len();
    }

    pub fn resize(&mut self, new_len: usize, value: u8) {
        if new_len > self.len {
            self.reserve(new_len - self.len);
            unsafe {
                ptr::write_bytes(self.ptr.as_ptr().add(self.len), value, new_len - self.len);
            }
        }
        self.len = new_len;
    }

    #[inline]
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// View the contents as `T`. Panics if the length is not a multiple of
    /// `size_of::<T>()` or `T` needs more alignment than the buffer has.
    #[inline]
    pub fn typed<T: bytemuck::AnyBitPattern>(&self) -> &[T] {
        bytemuck::cast_slice(self.as_slice())
    }

    #[inline]
    pub fn typed_mut<T: bytemuck::AnyBitPattern + bytemuck::NoUninit>(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(self.as_slice_mut())
    }

    pub fn extend_from_typed_slice<T: bytemuck::NoUninit>(&mut self, values: &[T]) {
        self.extend_from_slice(bytemuck::cast_slice(values));
    }

    fn realloc_or_abort(&mut self, new_capacity: usize) {
        if let Err(err) = self.realloc(new_capacity) {
            match Layout::from_size_align(new_capacity, self.alignment) {
                Ok(layout) => handle_alloc_error(layout),
                Err(_) => panic!("capacity overflow: {err}"),
            }
        }
    }

    #[cold]
    fn realloc(&mut self, new_capacity: usize) -> Result<(), AllocError> {
        let block = try_aligned_malloc(new_capacity, self.alignment)?;
        trace!(
            from = self.capacity,
            to = new_capacity,
            alignment = self.alignment,
            "aligned buffer realloc"
        );
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr(), block.as_ptr(), self.len);
            self.release();
        }
        self.ptr = block;
        self.capacity = new_capacity;
        Ok(())
    }

    unsafe fn release(&mut self) {
        if self.capacity > 0 {
            aligned_free(self.ptr.as_ptr());
        }
    }
}

/// Non-null, suitably aligned placeholder for a buffer with no storage.
fn dangling(alignment: usize) -> NonNull<u8> {
    // alignment is a non-zero power of two
    unsafe { NonNull::new_unchecked(ptr::null_mut::<u8>().wrapping_add(alignment)) }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { self.release() };
    }
}

impl Default for AlignedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for AlignedBuffer {
    fn clone(&self) -> AlignedBuffer {
        let mut buf = AlignedBuffer::with_capacity_and_alignment(self.len, self.alignment);
        buf.extend_from_slice(self.as_slice());
        buf
    }
}

impl PartialEq for AlignedBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for AlignedBuffer {}

impl Deref for AlignedBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl DerefMut for AlignedBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.as_slice_mut()
    }
}

impl fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("cap", &self.capacity)
            .field("alignment", &self.alignment)
            .finish_non_exhaustive()
    }
}
