#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// Dot product, 8 lanes at a time with FMA.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
pub unsafe fn dot_f32_avx2(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let mut acc = _mm256_setzero_ps();
    let mut i = 0;

    while i + 8 <= n {
        let a_vec = _mm256_loadu_ps(a.as_ptr().add(i));
        let b_vec = _mm256_loadu_ps(b.as_ptr().add(i));
        acc = _mm256_fmadd_ps(a_vec, b_vec, acc);
        i += 8;
    }

    // Fold 256 -> 128, then two horizontal adds.
    let sum128 = _mm_add_ps(_mm256_castps256_ps128(acc), _mm256_extractf128_ps(acc, 1));
    let sum128 = _mm_hadd_ps(sum128, sum128);
    let sum128 = _mm_hadd_ps(sum128, sum128);
    let mut sum = _mm_cvtss_f32(sum128);

    while i < n {
        sum += a[i] * b[i];
        i += 1;
    }

    sum
}
