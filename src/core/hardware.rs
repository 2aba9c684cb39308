//! Hardware Detection Module
//! Queries CPU instruction-set extensions at runtime.

use crate::core::config::ProbeConfig;
use crate::core::cpuid::{cpuid, CpuidRegs, Register};
use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CpuFeatures: u32 {
        const SSE2       = 1 << 0;
        const SSE3       = 1 << 1;
        const SSSE3      = 1 << 2;
        const FMA        = 1 << 3;
        const SSE4_1     = 1 << 4;
        const SSE4_2     = 1 << 5;
        const POPCNT     = 1 << 6;
        const AVX        = 1 << 7;
        const F16C       = 1 << 8;
        const RDRAND     = 1 << 9;
        const AVX2       = 1 << 10;
        const AVX512F    = 1 << 11;
        const AVX512DQ   = 1 << 12;
        const AVX512IFMA = 1 << 13;
        const AVX512PF   = 1 << 14;
        const AVX512ER   = 1 << 15;
        const AVX512CD   = 1 << 16;
        const AVX512BW   = 1 << 17;
        const AVX512VL   = 1 << 18;
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseFeatureError {
    #[error("unknown CPU feature name: {0:?}")]
    UnknownFeature(String),
}

/// Where a feature bit lives in the CPUID output.
#[derive(Debug, Clone, Copy)]
struct BitSource {
    leaf: u32,
    reg: Register,
    bit: u32,
}

#[derive(Debug, Clone, Copy)]
struct FeatureBit {
    flag: CpuFeatures,
    name: &'static str,
    // None: never reported (AVX-512ER only shipped on Knights Landing/Mill).
    source: Option<BitSource>,
}

const fn leaf_bit(flag: CpuFeatures, name: &'static str, leaf: u32, reg: Register, bit: u32) -> FeatureBit {
    FeatureBit {
        flag,
        name,
        source: Some(BitSource { leaf, reg, bit }),
    }
}

// All sub-leaf 0.
const FEATURE_TABLE: [FeatureBit; 19] = [
    leaf_bit(CpuFeatures::SSE2, "sse2", 1, Register::Edx, 26),
    leaf_bit(CpuFeatures::SSE3, "sse3", 1, Register::Ecx, 0),
    leaf_bit(CpuFeatures::SSSE3, "ssse3", 1, Register::Ecx, 9),
    leaf_bit(CpuFeatures::FMA, "fma", 1, Register::Ecx, 12),
    leaf_bit(CpuFeatures::SSE4_1, "sse4.1", 1, Register::Ecx, 19),
    leaf_bit(CpuFeatures::SSE4_2, "sse4.2", 1, Register::Ecx, 20),
    leaf_bit(CpuFeatures::POPCNT, "popcnt", 1, Register::Ecx, 23),
    leaf_bit(CpuFeatures::AVX, "avx", 1, Register::Ecx, 28),
    leaf_bit(CpuFeatures::F16C, "f16c", 1, Register::Ecx, 29),
    leaf_bit(CpuFeatures::RDRAND, "rdrand", 1, Register::Ecx, 30),
    leaf_bit(CpuFeatures::AVX2, "avx2", 7, Register::Ebx, 5),
    leaf_bit(CpuFeatures::AVX512F, "avx512f", 7, Register::Ebx, 16),
    leaf_bit(CpuFeatures::AVX512DQ, "avx512dq", 7, Register::Ebx, 17),
    leaf_bit(CpuFeatures::AVX512IFMA, "avx512ifma", 7, Register::Ebx, 21),
    leaf_bit(CpuFeatures::AVX512PF, "avx512pf", 7, Register::Ebx, 26),
    FeatureBit {
        flag: CpuFeatures::AVX512ER,
        name: "avx512er",
        source: None,
    },
    leaf_bit(CpuFeatures::AVX512CD, "avx512cd", 7, Register::Ebx, 28),
    leaf_bit(CpuFeatures::AVX512BW, "avx512bw", 7, Register::Ebx, 30),
    leaf_bit(CpuFeatures::AVX512VL, "avx512vl", 7, Register::Ebx, 31),
];

static HOST: OnceLock<CpuFeatures> = OnceLock::new();

impl CpuFeatures {
    /// Issue CPUID now and decode the result. Off x86 this is always empty.
    pub fn probe() -> Self {
        Self::from_leaves(cpuid(1, 0), cpuid(7, 0))
    }

    /// Decode leaf 1 and leaf 7 (sub-leaf 0) register dumps.
    pub fn from_leaves(leaf1: CpuidRegs, leaf7: CpuidRegs) -> Self {
        let mut features = CpuFeatures::empty();
        for entry in FEATURE_TABLE.iter() {
            let Some(src) = entry.source else { continue };
            let regs = match src.leaf {
                1 => leaf1,
                7 => leaf7,
                _ => CpuidRegs::ZERO,
            };
            if regs.bit(src.reg, src.bit) {
                features |= entry.flag;
            }
        }
        features
    }

    /// Features of the running CPU, resolved once per process.
    ///
    /// The first call probes the processor and removes anything disabled by
    /// [`ProbeConfig::from_env`]; later calls are a plain read.
    pub fn host() -> Self {
        *HOST.get_or_init(|| {
            let probed = Self::probe();
            let features = ProbeConfig::from_env().apply(probed);
            debug!(
                features = %features,
                masked = %(probed - features),
                "resolved host CPU features"
            );
            features
        })
    }

    /// Canonical lowercase name of a single flag.
    pub fn name_of(flag: CpuFeatures) -> Option<&'static str> {
        FEATURE_TABLE
            .iter()
            .find(|entry| entry.flag == flag)
            .map(|entry| entry.name)
    }

    /// Look up one feature by name. Case-insensitive; `sse41`/`sse42` are
    /// accepted for the dotted spellings.
    pub fn lookup(name: &str) -> Option<CpuFeatures> {
        let lower = name.trim().to_ascii_lowercase();
        let canonical = match lower.as_str() {
            "sse41" | "sse4_1" => "sse4.1",
            "sse42" | "sse4_2" => "sse4.2",
            other => other,
        };
        FEATURE_TABLE
            .iter()
            .find(|entry| entry.name == canonical)
            .map(|entry| entry.flag)
    }

    /// Names of the set flags in table order.
    pub fn names(self) -> Vec<&'static str> {
        FEATURE_TABLE
            .iter()
            .filter(|entry| self.contains(entry.flag))
            .map(|entry| entry.name)
            .collect()
    }

    /// Every known feature paired with whether it is in `self`.
    pub fn report(self) -> Vec<(&'static str, bool)> {
        FEATURE_TABLE
            .iter()
            .map(|entry| (entry.name, self.contains(entry.flag)))
            .collect()
    }
}

impl fmt::Display for CpuFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join(" "))
    }
}

impl FromStr for CpuFeatures {
    type Err = ParseFeatureError;

    /// Parses a list of names separated by commas, `|` or whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut features = CpuFeatures::empty();
        for name in split_names(s) {
            features |= CpuFeatures::lookup(name)
                .ok_or_else(|| ParseFeatureError::UnknownFeature(name.to_string()))?;
        }
        Ok(features)
    }
}

pub(crate) fn split_names(list: &str) -> impl Iterator<Item = &str> {
    list.split(|c: char| c == ',' || c == '|' || c.is_whitespace())
        .filter(|n| !n.is_empty())
}

#[inline]
fn host_has(flag: CpuFeatures) -> bool {
    CpuFeatures::host().contains(flag)
}

#[inline]
pub fn cpu_has_sse2() -> bool {
    host_has(CpuFeatures::SSE2)
}

#[inline]
pub fn cpu_has_sse3() -> bool {
    host_has(CpuFeatures::SSE3)
}

#[inline]
pub fn cpu_has_ssse3() -> bool {
    host_has(CpuFeatures::SSSE3)
}

#[inline]
pub fn cpu_has_fma() -> bool {
    host_has(CpuFeatures::FMA)
}

#[inline]
pub fn cpu_has_sse41() -> bool {
    host_has(CpuFeatures::SSE4_1)
}

#[inline]
pub fn cpu_has_sse42() -> bool {
    host_has(CpuFeatures::SSE4_2)
}

#[inline]
pub fn cpu_has_popcnt() -> bool {
    host_has(CpuFeatures::POPCNT)
}

#[inline]
pub fn cpu_has_avx() -> bool {
    host_has(CpuFeatures::AVX)
}

#[inline]
pub fn cpu_has_f16c() -> bool {
    host_has(CpuFeatures::F16C)
}

#[inline]
pub fn cpu_has_rdrand() -> bool {
    host_has(CpuFeatures::RDRAND)
}

#[inline]
pub fn cpu_has_avx2() -> bool {
    host_has(CpuFeatures::AVX2)
}

#[inline]
pub fn cpu_has_avx512f() -> bool {
    host_has(CpuFeatures::AVX512F)
}

#[inline]
pub fn cpu_has_avx512dq() -> bool {
    host_has(CpuFeatures::AVX512DQ)
}

#[inline]
pub fn cpu_has_avx512ifma() -> bool {
    host_has(CpuFeatures::AVX512IFMA)
}

#[inline]
pub fn cpu_has_avx512pf() -> bool {
    host_has(CpuFeatures::AVX512PF)
}

/// Always false: Knights Landing only.
#[inline]
pub fn cpu_has_avx512er() -> bool {
    false
}

#[inline]
pub fn cpu_has_avx512cd() -> bool {
    host_has(CpuFeatures::AVX512CD)
}

#[inline]
pub fn cpu_has_avx512bw() -> bool {
    host_has(CpuFeatures::AVX512BW)
}

#[inline]
pub fn cpu_has_avx512vl() -> bool {
    host_has(CpuFeatures::AVX512VL)
}
