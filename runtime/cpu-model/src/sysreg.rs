//! Implementation-defined system register table
//!
//! Apple cores expose a large set of IMPLEMENTATION DEFINED registers in the
//! `op0 = 3, CRn = 15` space. The kernel touches these during early boot
//! (HID chicken bits, performance counters, pointer-auth keys, lockdown
//! registers); they only need to hold whatever was last written.

use core::fmt;

use bitflags::bitflags;

/// System register encoding `(op0, op1, CRn, CRm, op2)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SysRegKey {
    pub op0: u8,
    pub op1: u8,
    pub crn: u8,
    pub crm: u8,
    pub op2: u8,
}

impl SysRegKey {
    pub const fn new(op0: u8, op1: u8, crn: u8, crm: u8, op2: u8) -> Self {
        Self {
            op0,
            op1,
            crn,
            crm,
            op2,
        }
    }
}

impl fmt::Display for SysRegKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "S{}_{}_C{}_C{}_{}",
            self.op0, self.op1, self.crn, self.crm, self.op2
        )
    }
}

bitflags! {
    /// Access rights of a system register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SysRegAccess: u8 {
        const EL0_R = 1 << 0;
        const EL0_W = 1 << 1;
        const EL1_R = 1 << 2;
        const EL1_W = 1 << 3;

        /// Read/write from EL1 and above
        const PL1_RW = Self::EL1_R.bits() | Self::EL1_W.bits();
    }
}

/// Static description of one register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysRegDef {
    pub name: &'static str,
    pub key: SysRegKey,
    pub access: SysRegAccess,
    pub reset: u64,
}

impl SysRegDef {
    const fn pl1(name: &'static str, key: SysRegKey) -> Self {
        Self {
            name,
            key,
            access: SysRegAccess::PL1_RW,
            reset: 0,
        }
    }

    const fn with_reset(mut self, reset: u64) -> Self {
        self.reset = reset;
        self
    }
}

const fn imp(op1: u8, crm: u8, op2: u8) -> SysRegKey {
    SysRegKey::new(3, op1, 15, crm, op2)
}

/// Per-core register table, in MMIO window order
pub const T8030_CORE_REGISTERS: &[SysRegDef] = &[
    SysRegDef::pl1("HID11", imp(0, 13, 0)),
    SysRegDef::pl1("HID3", imp(0, 3, 0)),
    SysRegDef::pl1("HID5", imp(0, 5, 0)),
    SysRegDef::pl1("HID4", imp(0, 4, 0)),
    SysRegDef::pl1("EHID4", imp(0, 4, 1)),
    SysRegDef::pl1("HID8", imp(0, 8, 0)),
    SysRegDef::pl1("HID7", imp(0, 7, 0)),
    SysRegDef::pl1("LSU_ERR_STS", imp(3, 0, 0)),
    SysRegDef::pl1("PMC0", imp(2, 0, 0)),
    SysRegDef::pl1("PMC1", imp(2, 1, 0)),
    SysRegDef::pl1("PMCR1", imp(1, 1, 0)),
    SysRegDef::pl1("PMSR", imp(1, 13, 0)),
    SysRegDef::pl1("L2ACTLR_EL1", imp(1, 0, 0)),
    SysRegDef::pl1("APCTL_EL1", imp(4, 0, 4)).with_reset(2),
    SysRegDef::pl1("KERNELKEYLO_EL1", imp(4, 1, 0)),
    SysRegDef::pl1("KERNELKEYHI_EL1", imp(4, 1, 1)),
    SysRegDef::pl1("S3_4_C15_C0_5", imp(4, 0, 5)),
    SysRegDef::pl1("S3_4_C15_C1_3", imp(4, 1, 3)),
    SysRegDef::pl1("S3_4_C15_C1_4", imp(4, 1, 4)),
    SysRegDef::pl1("IPI_SR", imp(5, 1, 1)),
    SysRegDef::pl1("CYC_OVRD", imp(5, 5, 0)),
    SysRegDef::pl1("ACC_CFG", imp(5, 4, 0)),
    SysRegDef::pl1("VMSA_LOCK_EL1", imp(4, 1, 2)),
    SysRegDef::pl1("S3_6_C15_C1_0", imp(6, 1, 0)),
    SysRegDef::pl1("S3_6_C15_C1_1", imp(6, 1, 1)),
    SysRegDef::pl1("S3_6_C15_C1_2", imp(6, 1, 2)),
    SysRegDef::pl1("S3_6_C15_C1_5", imp(6, 1, 5)),
    SysRegDef::pl1("S3_6_C15_C1_6", imp(6, 1, 6)),
    SysRegDef::pl1("S3_6_C15_C1_7", imp(6, 1, 7)),
    SysRegDef::pl1("S3_6_C15_C3_0", imp(6, 3, 0)),
    SysRegDef::pl1("S3_6_C15_C3_1", imp(6, 3, 1)),
    SysRegDef::pl1("S3_6_C15_C8_0", imp(6, 8, 0)),
    SysRegDef::pl1("S3_6_C15_C8_1", imp(6, 8, 1)),
    SysRegDef::pl1("S3_6_C15_C8_2", imp(6, 8, 2)),
    SysRegDef::pl1("S3_6_C15_C8_3", imp(6, 8, 3)),
    SysRegDef::pl1("S3_6_C15_C9_1", imp(6, 9, 1)),
    SysRegDef::pl1("UPMPCM", imp(7, 5, 4)),
    SysRegDef::pl1("UPMCR0", imp(7, 0, 4)),
    SysRegDef::pl1("UPMSR", imp(7, 6, 4)),
];

/// Cluster register table (no named registers)
pub const T8030_CLUSTER_REGISTERS: &[SysRegDef] = &[];
