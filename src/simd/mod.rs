pub mod avx2;
pub mod scalar;

use crate::core::hardware::CpuFeatures;
use std::sync::OnceLock;

/// Ordered list of kernel variants keyed by the CPU features they need.
///
/// Candidates are tried in insertion order, so register the widest variant
/// first. The fallback must run anywhere.
#[derive(Debug, Clone)]
pub struct KernelTable<F: Copy> {
    candidates: Vec<(CpuFeatures, F)>,
    fallback: F,
}

impl<F: Copy> KernelTable<F> {
    pub fn new(fallback: F) -> Self {
        Self {
            candidates: Vec::new(),
            fallback,
        }
    }

    pub fn with(mut self, required: CpuFeatures, kernel: F) -> Self {
        self.candidates.push((required, kernel));
        self
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// First candidate whose requirements are all in `available`.
    pub fn select(&self, available: CpuFeatures) -> F {
        self.candidates
            .iter()
            .find(|(required, _)| available.contains(*required))
            .map(|(_, kernel)| *kernel)
            .unwrap_or(self.fallback)
    }

    /// Select against the host CPU.
    pub fn resolve(&self) -> F {
        self.select(CpuFeatures::host())
    }
}

pub type DotFunc = unsafe fn(&[f32], &[f32]) -> f32;

fn dot_kernels() -> KernelTable<DotFunc> {
    let table = KernelTable::new(scalar::dot_f32 as DotFunc);

    // CPUID only says the silicon has AVX; std additionally checks that the
    // OS saves YMM state before we let the kernel run.
    #[cfg(target_arch = "x86_64")]
    let table = if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
        table.with(
            CpuFeatures::AVX | CpuFeatures::AVX2 | CpuFeatures::FMA,
            avx2::dot_f32_avx2 as DotFunc,
        )
    } else {
        table
    };

    table
}

static DOT: OnceLock<DotFunc> = OnceLock::new();

/// Dot product of two equal-length slices using the best kernel for this CPU.
pub fn dot_f32(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    let kernel = *DOT.get_or_init(|| dot_kernels().resolve());
    // Kernels in the table only run when their features were detected.
    unsafe { kernel(a, b) }
}
