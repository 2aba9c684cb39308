use crate::core::hardware::CpuFeatures;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Suspicious(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Each entry reads "feature implies prerequisite". Real silicon never
/// breaks these; hypervisors that mask CPUID bits sometimes do.
const IMPLICATIONS: &[(CpuFeatures, CpuFeatures)] = &[
    (CpuFeatures::SSE3, CpuFeatures::SSE2),
    (CpuFeatures::SSSE3, CpuFeatures::SSE3),
    (CpuFeatures::SSE4_1, CpuFeatures::SSSE3),
    (CpuFeatures::SSE4_2, CpuFeatures::SSE4_1),
    (CpuFeatures::AVX, CpuFeatures::SSE4_2),
    (CpuFeatures::FMA, CpuFeatures::AVX),
    (CpuFeatures::F16C, CpuFeatures::AVX),
    (CpuFeatures::AVX2, CpuFeatures::AVX),
    (CpuFeatures::AVX512F, CpuFeatures::AVX2),
    (CpuFeatures::AVX512DQ, CpuFeatures::AVX512F),
    (CpuFeatures::AVX512IFMA, CpuFeatures::AVX512F),
    (CpuFeatures::AVX512PF, CpuFeatures::AVX512F),
    (CpuFeatures::AVX512ER, CpuFeatures::AVX512F),
    (CpuFeatures::AVX512CD, CpuFeatures::AVX512F),
    (CpuFeatures::AVX512BW, CpuFeatures::AVX512F),
    (CpuFeatures::AVX512VL, CpuFeatures::AVX512F),
];

pub struct Diagnostics;

impl Diagnostics {
    /// Checks a feature set for missing prerequisites.
    /// All violations are reported together, separated by "; ".
    pub fn check(features: CpuFeatures) -> HealthStatus {
        let problems: Vec<String> = IMPLICATIONS
            .iter()
            .filter(|(feature, required)| features.contains(*feature) && !features.contains(*required))
            .map(|(feature, required)| {
                format!(
                    "{} reported without {}",
                    CpuFeatures::name_of(*feature).unwrap_or("?"),
                    CpuFeatures::name_of(*required).unwrap_or("?")
                )
            })
            .collect();

        if problems.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Suspicious(problems.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_full_sets_are_healthy() {
        assert_eq!(Diagnostics::check(CpuFeatures::empty()), HealthStatus::Healthy);
        assert!(Diagnostics::check(CpuFeatures::all()).is_healthy());
    }

    #[test]
    fn test_haswell_like_set_is_healthy() {
        let haswell = CpuFeatures::SSE2
            | CpuFeatures::SSE3
            | CpuFeatures::SSSE3
            | CpuFeatures::SSE4_1
            | CpuFeatures::SSE4_2
            | CpuFeatures::POPCNT
            | CpuFeatures::AVX
            | CpuFeatures::F16C
            | CpuFeatures::FMA
            | CpuFeatures::RDRAND
            | CpuFeatures::AVX2;
        assert!(Diagnostics::check(haswell).is_healthy());
    }

    #[test]
    fn test_avx2_without_avx() {
        let status = Diagnostics::check(CpuFeatures::AVX2 | CpuFeatures::SSE2);
        match status {
            HealthStatus::Suspicious(msg) => assert_eq!(msg, "avx2 reported without avx"),
            other => panic!("expected suspicious, got {:?}", other),
        }
    }

    #[test]
    fn test_reports_every_violation() {
        let status = Diagnostics::check(CpuFeatures::AVX512VL | CpuFeatures::SSE3);
        let HealthStatus::Suspicious(msg) = status else {
            panic!("expected suspicious");
        };
        assert!(msg.contains("sse3 reported without sse2"));
        assert!(msg.contains("avx512vl reported without avx512f"));
    }
}
