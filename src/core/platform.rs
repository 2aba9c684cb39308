//! Platform Identification
//! Everything here is resolved at compile time except the L1 line size,
//! which is asked of the OS where it can tell us.

use serde::Serialize;
use std::ops::{Deref, DerefMut};

/// Assumed cache line size for layout decisions (x86-64 and most aarch64).
pub const CACHE_LINE_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endian = Endian::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endian = Endian::Big;
}

#[inline(always)]
pub const fn littleendian() -> bool {
    matches!(Endian::NATIVE, Endian::Little)
}

#[inline(always)]
pub const fn bigendian() -> bool {
    matches!(Endian::NATIVE, Endian::Big)
}

/// Pads and aligns `T` to its own cache line to keep it from sharing one
/// with neighbouring data.
#[repr(align(64))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheAligned<T>(pub T);

const _: () = assert!(std::mem::align_of::<CacheAligned<u8>>() == CACHE_LINE_SIZE);

impl<T> CacheAligned<T> {
    pub const fn new(value: T) -> Self {
        CacheAligned(value)
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CacheAligned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformInfo {
    pub arch: &'static str,
    pub os: &'static str,
    pub family: &'static str,
    pub pointer_width: u32,
    pub endian: Endian,
    pub cache_line_size: usize,
    /// L1 data cache line as reported by the OS.
    pub l1d_line_size: Option<usize>,
}

impl PlatformInfo {
    pub fn current() -> Self {
        Self {
            arch: std::env::consts::ARCH,
            os: std::env::consts::OS,
            family: std::env::consts::FAMILY,
            pointer_width: usize::BITS,
            endian: Endian::NATIVE,
            cache_line_size: CACHE_LINE_SIZE,
            l1d_line_size: l1d_line_size(),
        }
    }

    pub fn is_x86(&self) -> bool {
        matches!(self.arch, "x86" | "x86_64")
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn l1d_line_size() -> Option<usize> {
    let size = unsafe { libc::sysconf(libc::_SC_LEVEL1_DCACHE_LINESIZE) };
    if size > 0 {
        Some(size as usize)
    } else {
        None
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn l1d_line_size() -> Option<usize> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endian_matches_target() {
        assert_ne!(littleendian(), bigendian());
        assert_eq!(littleendian(), cfg!(target_endian = "little"));
        assert_eq!(u16::from_ne_bytes([1, 0]) == 1, littleendian());
    }

    #[test]
    fn test_cache_aligned() {
        let values = [CacheAligned::new(1u8), CacheAligned::new(2u8)];
        let a = &values[0] as *const _ as usize;
        let b = &values[1] as *const _ as usize;
        assert_eq!(a % CACHE_LINE_SIZE, 0);
        assert_eq!(b - a, CACHE_LINE_SIZE);
        assert_eq!(*values[1], 2);
        assert_eq!(values[0].into_inner(), 1);
    }

    #[test]
    fn test_platform_info() {
        let info = PlatformInfo::current();
        assert_eq!(info.pointer_width as usize, std::mem::size_of::<usize>() * 8);
        assert_eq!(info.is_x86(), cfg!(any(target_arch = "x86", target_arch = "x86_64")));
        if let Some(line) = info.l1d_line_size {
            assert!(line.is_power_of_two());
        }

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["os"], std::env::consts::OS);
        assert!(json["endian"] == "little" || json["endian"] == "big");
    }
}
