use crate::memory::aligned::{aligned_free, try_aligned_malloc, AllocError};
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

struct AssertOverAligned<T>(PhantomData<T>);

impl<T> AssertOverAligned<T> {
    const OK: () = assert!(
        mem::align_of::<T>() > mem::align_of::<*const ()>(),
        "type is not over-aligned, use Box instead of aligned_new"
    );
}

/// Frees the block if the constructor unwinds before the value is written.
struct BlockGuard(*mut u8);

impl Drop for BlockGuard {
    fn drop(&mut self) {
        unsafe { aligned_free(self.0) };
    }
}

fn alloc_with<T, F: FnOnce() -> T>(init: F) -> Result<NonNull<T>, AllocError> {
    let () = AssertOverAligned::<T>::OK;

    let block = try_aligned_malloc(mem::size_of::<T>(), mem::align_of::<T>())?;
    let guard = BlockGuard(block.as_ptr());
    let value = init();
    mem::forget(guard);

    let ptr = block.cast::<T>();
    unsafe { ptr.as_ptr().write(value) };
    Ok(ptr)
}

/// Move `value` into a freshly allocated block aligned for `T`.
///
/// Returns null if the allocation fails (`value` is dropped). Only for
/// over-aligned types; anything else is rejected at compile time:
///
/// ```compile_fail
/// let p = platform_caps::aligned_new(5u64);
/// ```
pub fn aligned_new<T>(value: T) -> *mut T {
    aligned_new_with(move || value)
}

/// Like [`aligned_new`], but the value is only constructed once the block
/// exists, so a failed allocation never runs `init`.
pub fn aligned_new_with<T, F: FnOnce() -> T>(init: F) -> *mut T {
    match alloc_with(init) {
        Ok(ptr) => ptr.as_ptr(),
        Err(_) => ptr::null_mut(),
    }
}

/// Drop the value and release its block. Null is ignored.
///
/// # Safety
///
/// `ptr` must be null or come from [`aligned_new`] / [`aligned_new_with`]
/// (or [`AlignedBox::into_raw`]) and must not be used afterwards.
pub unsafe fn aligned_delete<T>(ptr: *mut T) {
    if ptr.is_null() {
        return;
    }
    ptr::drop_in_place(ptr);
    aligned_free(ptr.cast());
}

/// Owning pointer to an over-aligned `T`, released on drop.
pub struct AlignedBox<T> {
    ptr: NonNull<T>,
    _owns: PhantomData<T>,
}

unsafe impl<T: Send> Send for AlignedBox<T> {}
unsafe impl<T: Sync> Sync for AlignedBox<T> {}

impl<T> AlignedBox<T> {
    pub fn new(value: T) -> Result<Self, AllocError> {
        Self::try_new_with(move || value)
    }

    pub fn try_new_with<F: FnOnce() -> T>(init: F) -> Result<Self, AllocError> {
        Ok(Self {
            ptr: alloc_with(init)?,
            _owns: PhantomData,
        })
    }

    /// Give up ownership; release later with [`aligned_delete`] or
    /// [`AlignedBox::from_raw`].
    pub fn into_raw(b: Self) -> *mut T {
        ManuallyDrop::new(b).ptr.as_ptr()
    }

    /// # Safety
    ///
    /// `ptr` must be non-null and come from [`aligned_new`],
    /// [`aligned_new_with`] or [`AlignedBox::into_raw`], with no other owner.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self {
            ptr: NonNull::new_unchecked(ptr),
            _owns: PhantomData,
        }
    }

    /// Move the value out and release the block.
    pub fn into_inner(b: Self) -> T {
        let raw = Self::into_raw(b);
        unsafe {
            let value = raw.read();
            aligned_free(raw.cast());
            value
        }
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T> Drop for AlignedBox<T> {
    fn drop(&mut self) {
        unsafe { aligned_delete(self.ptr.as_ptr()) };
    }
}

impl<T> Deref for AlignedBox<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for AlignedBox<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: fmt::Debug> fmt::Debug for AlignedBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}
