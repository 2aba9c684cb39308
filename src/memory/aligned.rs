//! Portable aligned malloc / free.
//!
//! Blocks come from the platform's native aligned allocator (`posix_memalign`
//! on Unix, `_aligned_malloc` on Windows). Anything else gets a block from the
//! system allocator with a small header that remembers its layout, since
//! `aligned_free` is not told the size.

use std::ptr::{self, NonNull};
use thiserror::Error;

/// Smallest alignment ever handed to the platform allocator.
pub const MIN_ALIGN: usize = std::mem::align_of::<*const ()>();

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("alignment {0} is not a power of two")]
    InvalidAlignment(usize),
    #[error("out of memory allocating {size} bytes aligned to {align}")]
    OutOfMemory { size: usize, align: usize },
}

#[cfg(test)]
thread_local! {
    // Per-thread count of blocks handed out and not yet freed.
    pub(crate) static LIVE_BLOCKS: std::cell::Cell<isize> = const { std::cell::Cell::new(0) };
}

/// Allocate at least `size` bytes at an address that is a multiple of `align`.
///
/// `align` must be a power of two; anything else is refused. Alignments below
/// pointer alignment are raised to it. A zero `size` still yields a distinct
/// block that must be freed.
pub fn try_aligned_malloc(size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
    if !align.is_power_of_two() {
        return Err(AllocError::InvalidAlignment(align));
    }
    let effective_align = align.max(MIN_ALIGN);
    let ptr = unsafe { sys::alloc(size.max(1), effective_align) };
    let ptr = NonNull::new(ptr).ok_or(AllocError::OutOfMemory { size, align })?;
    debug_assert_eq!(ptr.as_ptr() as usize % align, 0);

    #[cfg(test)]
    LIVE_BLOCKS.with(|n| n.set(n.get() + 1));

    Ok(ptr)
}

/// Null-returning form of [`try_aligned_malloc`].
#[inline]
pub fn aligned_malloc(size: usize, align: usize) -> *mut u8 {
    match try_aligned_malloc(size, align) {
        Ok(ptr) => ptr.as_ptr(),
        Err(_) => ptr::null_mut(),
    }
}

/// Release a block from [`aligned_malloc`]. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or a live block returned by [`aligned_malloc`] /
/// [`try_aligned_malloc`], and must not be used afterwards.
#[inline]
pub unsafe fn aligned_free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }

    #[cfg(test)]
    LIVE_BLOCKS.with(|n| n.set(n.get() - 1));

    sys::free(ptr);
}

#[cfg(unix)]
mod sys {
    use std::ptr;

    pub unsafe fn alloc(size: usize, align: usize) -> *mut u8 {
        let mut out: *mut libc::c_void = ptr::null_mut();
        if libc::posix_memalign(&mut out, align, size) != 0 {
            return ptr::null_mut();
        }
        out.cast()
    }

    pub unsafe fn free(ptr: *mut u8) {
        libc::free(ptr.cast());
    }
}

#[cfg(windows)]
mod sys {
    pub unsafe fn alloc(size: usize, align: usize) -> *mut u8 {
        libc::aligned_malloc(size, align).cast()
    }

    pub unsafe fn free(ptr: *mut u8) {
        libc::aligned_free(ptr.cast());
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    pub use super::fallback::{alloc, free};
}

/// Header-prefixed blocks on top of the system allocator.
///
/// Layout: `[padding][total size][block align][user data...]`, where the user
/// pointer sits `offset = max(align, HEADER)` bytes into the block.
#[cfg_attr(any(unix, windows), allow(dead_code))]
pub(crate) mod fallback {
    use std::alloc::{GlobalAlloc, Layout, System};
    use std::ptr;

    const WORD: usize = std::mem::size_of::<usize>();
    const HEADER: usize = 2 * WORD;

    pub unsafe fn alloc(size: usize, align: usize) -> *mut u8 {
        let offset = align.max(HEADER);
        let Some(total) = size.checked_add(offset) else {
            return ptr::null_mut();
        };
        let Ok(layout) = Layout::from_size_align(total, offset) else {
            return ptr::null_mut();
        };
        let base = System.alloc(layout);
        if base.is_null() {
            return base;
        }
        let user = base.add(offset);
        user.sub(HEADER).cast::<usize>().write(total);
        user.sub(WORD).cast::<usize>().write(offset);
        user
    }

    pub unsafe fn free(user: *mut u8) {
        let total = user.sub(HEADER).cast::<usize>().read();
        let offset = user.sub(WORD).cast::<usize>().read();
        let base = user.sub(offset);
        System.dealloc(base, Layout::from_size_align_unchecked(total, offset));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn live() -> isize {
        LIVE_BLOCKS.with(|n| n.get())
    }

    #[test]
    fn test_alloc_256_at_64() {
        let before = live();
        let p = aligned_malloc(256, 64);
        assert!(!p.is_null());
        assert_eq!(p as usize % 64, 0);
        unsafe {
            ptr::write_bytes(p, 0xAB, 256);
            assert_eq!(*p.add(255), 0xAB);
            aligned_free(p);
        }
        assert_eq!(live(), before);

        // Heap still healthy.
        let v: Vec<u64> = (0..1024).collect();
        assert_eq!(v.iter().sum::<u64>(), 1023 * 1024 / 2);
    }

    #[test]
    fn test_random_sizes_and_alignments() {
        let mut rng = rand::thread_rng();
        let before = live();
        let mut blocks = Vec::new();
        for _ in 0..500 {
            let size = rng.gen_range(1..=8192);
            let align = 1usize << rng.gen_range(0..13);
            let p = aligned_malloc(size, align);
            assert!(!p.is_null(), "size {size} align {align}");
            assert_eq!(p as usize % align, 0);
            unsafe { ptr::write_bytes(p, 0x5A, size) };
            blocks.push((p, size));
        }
        for (p, size) in blocks {
            unsafe {
                assert_eq!(*p.add(size - 1), 0x5A);
                aligned_free(p);
            }
        }
        assert_eq!(live(), before);
    }

    #[test]
    fn test_zero_size() {
        let p = aligned_malloc(0, 32);
        assert!(!p.is_null());
        assert_eq!(p as usize % 32, 0);
        unsafe { aligned_free(p) };
    }

    #[test]
    fn test_free_null_is_noop() {
        let before = live();
        unsafe { aligned_free(ptr::null_mut()) };
        assert_eq!(live(), before);
    }

    #[test]
    fn test_invalid_alignment() {
        assert_eq!(try_aligned_malloc(64, 0), Err(AllocError::InvalidAlignment(0)));
        assert_eq!(try_aligned_malloc(64, 48), Err(AllocError::InvalidAlignment(48)));
        assert!(aligned_malloc(64, 3).is_null());
    }

    #[test]
    fn test_small_alignment_is_raised() {
        let p = try_aligned_malloc(10, 1).unwrap();
        assert_eq!(p.as_ptr() as usize % MIN_ALIGN, 0);
        unsafe { aligned_free(p.as_ptr()) };
    }

    #[test]
    fn test_out_of_memory_is_reported() {
        let err = try_aligned_malloc(usize::MAX - 4096, 64).unwrap_err();
        assert_eq!(
            err,
            AllocError::OutOfMemory {
                size: usize::MAX - 4096,
                align: 64
            }
        );
    }

    #[test]
    fn test_fallback_allocator() {
        for align in [1usize, 8, 16, 64, 4096] {
            for size in [0usize, 1, 17, 1000] {
                unsafe {
                    let p = fallback::alloc(size, align);
                    assert!(!p.is_null());
                    assert_eq!(p as usize % align, 0);
                    ptr::write_bytes(p, 1, size);
                    fallback::free(p);
                }
            }
        }
        assert!(unsafe { fallback::alloc(usize::MAX, 64) }.is_null());
    }

    #[test]
    fn test_concurrent_alloc_free() {
        use rayon::prelude::*;
        (0..256usize).into_par_iter().for_each(|i| {
            let align = 16 << (i % 6);
            let p = aligned_malloc(i + 1, align);
            assert!(!p.is_null());
            assert_eq!(p as usize % align, 0);
            unsafe {
                ptr::write_bytes(p, i as u8, i + 1);
                aligned_free(p);
            }
        });
    }
}
