//! Short-lived typed scratch space.
//!
//! Requests up to [`STACK_LIMIT`] bytes live inline (on the stack of whoever
//! owns the [`Scratch`]); anything larger spills to the heap. Either way the
//! storage is cache-line aligned, zeroed, and released when the value goes
//! out of scope.

use crate::core::platform::CACHE_LINE_SIZE;
use bytemuck::{Pod, Zeroable};
use smallvec::SmallVec;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};

/// Largest request, in bytes, that is served without a heap allocation.
pub const STACK_LIMIT: usize = 1 << 16;

const INLINE_CHUNKS: usize = STACK_LIMIT / CACHE_LINE_SIZE;

#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct Chunk([u8; CACHE_LINE_SIZE]);

const _: () = assert!(mem::align_of::<Chunk>() == CACHE_LINE_SIZE);

// Plain bytes with no padding: size equals alignment.
unsafe impl Zeroable for Chunk {}
unsafe impl Pod for Chunk {}

struct AssertScratchable<T>(PhantomData<T>);

impl<T> AssertScratchable<T> {
    const OK: () = assert!(
        mem::size_of::<T>() > 0 && mem::align_of::<T>() <= CACHE_LINE_SIZE,
        "scratch elements must be sized and aligned to at most a cache line"
    );
}

/// `len` zeroed values of `T`, inline up to [`STACK_LIMIT`] bytes.
pub struct Scratch<T: Pod> {
    chunks: SmallVec<[Chunk; INLINE_CHUNKS]>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> Scratch<T> {
    /// # Panics
    ///
    /// If `len * size_of::<T>()` overflows `usize`.
    pub fn new(len: usize) -> Self {
        let () = AssertScratchable::<T>::OK;

        let bytes = match len.checked_mul(mem::size_of::<T>()) {
            Some(bytes) => bytes,
            None => panic!("scratch space for {len} elements overflows usize"),
        };
        let chunks = SmallVec::from_elem(Chunk([0; CACHE_LINE_SIZE]), bytes.div_ceil(CACHE_LINE_SIZE));
        Self {
            chunks,
            len,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when the request was too large to stay inline.
    #[inline]
    pub fn on_heap(&self) -> bool {
        self.chunks.spilled()
    }

    fn byte_len(&self) -> usize {
        self.len * mem::size_of::<T>()
    }

    pub fn as_slice(&self) -> &[T] {
        let bytes: &[u8] = bytemuck::cast_slice(&self.chunks[..]);
        bytemuck::cast_slice(&bytes[..self.byte_len()])
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let byte_len = self.byte_len();
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.chunks[..]);
        bytemuck::cast_slice_mut(&mut bytes[..byte_len])
    }
}

impl<T: Pod> Deref for Scratch<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Pod> DerefMut for Scratch<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Pod> fmt::Debug for Scratch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scratch")
            .field("len", &self.len)
            .field("on_heap", &self.on_heap())
            .finish()
    }
}

/// Run `f` over `len` zeroed values of `T` and release them afterwards.
pub fn with_scratch<T: Pod, R>(len: usize, f: impl FnOnce(&mut [T]) -> R) -> R {
    let mut scratch = Scratch::<T>::new(len);
    f(&mut scratch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_up_to_limit() {
        let elems = STACK_LIMIT / mem::size_of::<f32>();
        let mut s = Scratch::<f32>::new(elems);
        assert!(!s.on_heap());
        assert_eq!(s.len(), elems);
        assert!(s.iter().all(|&x| x == 0.0));

        s[elems - 1] = 3.5;
        assert_eq!(s.as_slice()[elems - 1], 3.5);
        assert_eq!(s.as_ptr() as usize % CACHE_LINE_SIZE, 0);
    }

    #[test]
    fn test_spills_above_limit() {
        let elems = STACK_LIMIT / mem::size_of::<f32>() + 1;
        let mut s = Scratch::<f32>::new(elems);
        assert!(s.on_heap());
        assert_eq!(s.len(), elems);
        assert!(s.iter().all(|&x| x == 0.0));

        for (i, x) in s.iter_mut().enumerate() {
            *x = i as f32;
        }
        assert_eq!(s[elems - 1], (elems - 1) as f32);
        assert_eq!(s.as_ptr() as usize % CACHE_LINE_SIZE, 0);
    }

    #[test]
    fn test_odd_element_sizes() {
        // 3-byte elements do not divide the chunk size.
        let mut s = Scratch::<[u8; 3]>::new(100);
        assert_eq!(s.len(), 100);
        s[99] = [1, 2, 3];
        assert_eq!(s[99], [1, 2, 3]);

        let just_over = Scratch::<[u8; 3]>::new(STACK_LIMIT / 3 + 1);
        assert!(just_over.on_heap());
    }

    #[test]
    fn test_empty() {
        let s = Scratch::<u64>::new(0);
        assert!(s.is_empty());
        assert!(!s.on_heap());
        assert!(s.as_slice().is_empty());
    }

    #[test]
    fn test_with_scratch() {
        let total = with_scratch::<u32, _>(1000, |buf| {
            for (i, x) in buf.iter_mut().enumerate() {
                *x = i as u32;
            }
            buf.iter().map(|&x| x as u64).sum::<u64>()
        });
        assert_eq!(total, 999 * 1000 / 2);

        let big = with_scratch::<u64, _>(STACK_LIMIT, |buf| buf.len());
        assert_eq!(big, STACK_LIMIT);
    }

    #[test]
    #[should_panic(expected = "overflows usize")]
    fn test_size_overflow_panics() {
        let _ = Scratch::<u64>::new(usize::MAX / 2);
    }
}
