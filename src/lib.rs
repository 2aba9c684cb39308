//! Platform capability layer: which instruction-set extensions the running
//! CPU offers, and memory blocks aligned tighter than the default allocator
//! guarantees.

pub mod core;
pub mod memory;
pub mod simd;

pub use crate::core::config::ProbeConfig;
pub use crate::core::cpuid::{cpuid, CpuidRegs};
pub use crate::core::diagnostics::{Diagnostics, HealthStatus};
pub use crate::core::hardware::{
    cpu_has_avx, cpu_has_avx2, cpu_has_avx512bw, cpu_has_avx512cd, cpu_has_avx512dq,
    cpu_has_avx512er, cpu_has_avx512f, cpu_has_avx512ifma, cpu_has_avx512pf, cpu_has_avx512vl,
    cpu_has_f16c, cpu_has_fma, cpu_has_popcnt, cpu_has_rdrand, cpu_has_sse2, cpu_has_sse3,
    cpu_has_sse41, cpu_has_sse42, cpu_has_ssse3, CpuFeatures, ParseFeatureError,
};
pub use crate::core::platform::{bigendian, littleendian, CacheAligned, Endian, PlatformInfo, CACHE_LINE_SIZE};
pub use crate::memory::aligned::{aligned_free, aligned_malloc, try_aligned_malloc, AllocError};
pub use crate::memory::boxed::{aligned_delete, aligned_new, aligned_new_with, AlignedBox};
pub use crate::memory::buffer::AlignedBuffer;
pub use crate::memory::scratch::{with_scratch, Scratch, STACK_LIMIT};
pub use crate::simd::KernelTable;
