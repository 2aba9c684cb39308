//! Processor Identification
//! Thin wrapper over the CPUID instruction. Every leaf the processor does not
//! report (or every leaf at all, off x86) reads back as zero.

const HYPERVISOR_LEAF_BASE: u32 = 0x4000_0000;
const EXTENDED_LEAF_BASE: u32 = 0x8000_0000;
// Leaf 1 ECX: set when running under a hypervisor.
const HYPERVISOR_PRESENT_BIT: u32 = 31;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuidRegs {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Eax,
    Ebx,
    Ecx,
    Edx,
}

impl CpuidRegs {
    pub const ZERO: CpuidRegs = CpuidRegs { eax: 0, ebx: 0, ecx: 0, edx: 0 };

    #[inline]
    pub fn get(&self, reg: Register) -> u32 {
        match reg {
            Register::Eax => self.eax,
            Register::Ebx => self.ebx,
            Register::Ecx => self.ecx,
            Register::Edx => self.edx,
        }
    }

    #[inline]
    pub fn bit(&self, reg: Register, bit: u32) -> bool {
        debug_assert!(bit < 32);
        self.get(reg) & (1u32 << bit) != 0
    }
}

/// Issue CPUID with the given leaf / sub-leaf selectors.
///
/// Each leaf range is bounded by the maximum its base leaf advertises: leaf 0
/// for basic leaves, leaf 0x4000_0000 for hypervisor leaves and leaf
/// 0x8000_0000 for extended ones. Leaves past that maximum return
/// [`CpuidRegs::ZERO`] instead of whatever the hardware echoes back. The
/// hypervisor range reads as zero unless leaf 1 reports a hypervisor.
pub fn cpuid(leaf: u32, sub_leaf: u32) -> CpuidRegs {
    if leaf > max_leaf_in_range(leaf) {
        return CpuidRegs::ZERO;
    }
    raw_cpuid(leaf, sub_leaf)
}

fn max_leaf_in_range(leaf: u32) -> u32 {
    if leaf >= EXTENDED_LEAF_BASE {
        return raw_cpuid(EXTENDED_LEAF_BASE, 0).eax;
    }
    if leaf >= HYPERVISOR_LEAF_BASE {
        // Bare metal answers this range with basic-leaf data.
        if !raw_cpuid(1, 0).bit(Register::Ecx, HYPERVISOR_PRESENT_BIT) {
            return 0;
        }
        // Some hypervisors leave EAX zero; their base leaf is still valid.
        return raw_cpuid(HYPERVISOR_LEAF_BASE, 0).eax.max(HYPERVISOR_LEAF_BASE);
    }
    raw_cpuid(0, 0).eax
}

/// Highest basic leaf supported, 0 when CPUID is unavailable.
pub fn max_basic_leaf() -> u32 {
    raw_cpuid(0, 0).eax
}

/// Vendor identification string from leaf 0 (e.g. "GenuineIntel").
pub fn vendor() -> Option<String> {
    let regs = raw_cpuid(0, 0);
    if regs == CpuidRegs::ZERO {
        return None;
    }
    // Vendor bytes are laid out in EBX, EDX, ECX order.
    let mut bytes = Vec::with_capacity(12);
    for reg in [regs.ebx, regs.edx, regs.ecx] {
        bytes.extend_from_slice(&reg.to_le_bytes());
    }
    String::from_utf8(bytes)
        .ok()
        .map(|s| s.trim_end_matches('\0').to_string())
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn raw_cpuid(leaf: u32, sub_leaf: u32) -> CpuidRegs {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::{__cpuid_count, has_cpuid};
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::__cpuid_count;

    #[cfg(target_arch = "x86")]
    if !has_cpuid() {
        return CpuidRegs::ZERO;
    }

    // Safe on every x86-64 CPU; on x86 guarded by has_cpuid above.
    #[allow(unused_unsafe)]
    let r = unsafe { __cpuid_count(leaf, sub_leaf) };
    CpuidRegs {
        eax: r.eax,
        ebx: r.ebx,
        ecx: r.ecx,
        edx: r.edx,
    }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn raw_cpuid(_leaf: u32, _sub_leaf: u32) -> CpuidRegs {
    CpuidRegs::ZERO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_bits() {
        let regs = CpuidRegs {
            eax: 0,
            ebx: 1 << 5,
            ecx: 1,
            edx: 0x8000_0000,
        };
        assert!(regs.bit(Register::Ebx, 5));
        assert!(!regs.bit(Register::Ebx, 4));
        assert!(regs.bit(Register::Ecx, 0));
        assert!(regs.bit(Register::Edx, 31));
        assert!(!regs.bit(Register::Eax, 31));
        assert_eq!(regs.get(Register::Edx), 0x8000_0000);
    }

    #[test]
    fn test_out_of_range_leaf_reads_zero() {
        // Past the end of both the basic and the hypervisor range.
        assert_eq!(cpuid(0x3FFF_FFFF, 0), CpuidRegs::ZERO);
        assert_eq!(cpuid(0x7FFF_FFFF, 0), CpuidRegs::ZERO);
    }

    #[test]
    fn test_hypervisor_range_is_gated() {
        let under_hypervisor = cpuid(1, 0).bit(Register::Ecx, HYPERVISOR_PRESENT_BIT);
        let base = cpuid(HYPERVISOR_LEAF_BASE, 0);
        if under_hypervisor {
            // Leaf 0x4000_0000 is always readable once a hypervisor is reported.
            assert_eq!(max_leaf_in_range(HYPERVISOR_LEAF_BASE), base.eax.max(HYPERVISOR_LEAF_BASE));
        } else {
            assert_eq!(base, CpuidRegs::ZERO);
            assert_eq!(cpuid(HYPERVISOR_LEAF_BASE + 1, 0), CpuidRegs::ZERO);
        }
    }

    #[test]
    fn test_repeatable() {
        // Leaf 1 EBX carries the APIC id of whichever core we run on, so only
        // the feature registers are compared.
        let (a, b) = (cpuid(1, 0), cpuid(1, 0));
        assert_eq!((a.ecx, a.edx), (b.ecx, b.edx));
        assert_eq!(cpuid(7, 0).ebx, cpuid(7, 0).ebx);
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[test]
    fn test_leaf_zero_on_x86() {
        assert!(max_basic_leaf() >= 1);
        let v = vendor().expect("x86 reports a vendor string");
        assert!(!v.is_empty());
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    #[test]
    fn test_everything_zero_off_x86() {
        assert_eq!(max_basic_leaf(), 0);
        assert_eq!(cpuid(1, 0), CpuidRegs::ZERO);
        assert!(vendor().is_none());
    }
}
