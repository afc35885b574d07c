// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Address formats distributed from match results to the ALUs.
//!
//! Stats addresses are 22 bits plus a per-flow-enable (PFE) bit:
//!
//! ```text
//!  22   21..19   18..13  12..3   2..0
//! PFE | op     | VPN   | index | subword
//! ```
//!
//! Meter, stateful and selector addresses are 27 bits:
//!
//! ```text
//! 26..24  23    22..17  16..7   6..0
//! op    | PFE | VPN   | index | bit offset
//! ```

use bitvector::mask64;
use std::fmt::Display;

/// Operation carried in a stats address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::FromRepr)]
#[repr(u8)]
pub enum StatsOp {
    Nop = 0,
    CfgRd = 1,
    CfgRdClr = 2,
    CfgWr = 3,
    Stats = 4,
}

/// Operation carried in a meter/stateful/selector address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::FromRepr)]
#[repr(u8)]
pub enum MeterOp {
    Nop = 0,
    CfgRd = 1,
    CfgWr = 2,
    Sweep = 3,
    Run0 = 4,
    Run1 = 5,
    Run2 = 6,
    Run3 = 7,
}

impl MeterOp {
    /// Stateful instruction index for the run ops.
    #[must_use]
    pub fn instruction(self) -> Option<usize> {
        match self {
            MeterOp::Run0 => Some(0),
            MeterOp::Run1 => Some(1),
            MeterOp::Run2 => Some(2),
            MeterOp::Run3 => Some(3),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StatsAddr(u32);

impl StatsAddr {
    pub const PFE_BIT: u32 = 22;
    const OP_SHIFT: u32 = 19;
    const WORD_SHIFT: u32 = 3;

    #[must_use]
    pub fn new(op: StatsOp, word: u32, subword: u8, pfe: bool) -> Self {
        let mut raw = (u32::from(op as u8) << Self::OP_SHIFT)
            | ((word & 0xFFFF) << Self::WORD_SHIFT)
            | u32::from(subword & 0x7);
        if pfe {
            raw |= 1 << Self::PFE_BIT;
        }
        Self(raw)
    }
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw & 0x7F_FFFF)
    }
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
    #[must_use]
    pub fn op(self) -> StatsOp {
        // op values 5..7 are reserved and behave as nop
        StatsOp::from_repr(((self.0 >> Self::OP_SHIFT) & 0x7) as u8).unwrap_or(StatsOp::Nop)
    }
    #[must_use]
    pub const fn pfe(self) -> bool {
        (self.0 >> Self::PFE_BIT) & 1 == 1
    }
    /// RAM word address: VPN and index.
    #[must_use]
    pub const fn word(self) -> u32 {
        (self.0 >> Self::WORD_SHIFT) & 0xFFFF
    }
    #[must_use]
    pub const fn vpn(self) -> u32 {
        self.word() >> 10
    }
    #[must_use]
    pub const fn index(self) -> u32 {
        self.word() & 0x3FF
    }
    #[must_use]
    pub const fn subword(self) -> u8 {
        (self.0 & 0x7) as u8
    }
}

impl Display for StatsAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stats[{:?} vpn={} idx={} sub={}{}]",
            self.op(),
            self.vpn(),
            self.index(),
            self.subword(),
            if self.pfe() { " pfe" } else { "" }
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MeterAddr(u32);

impl MeterAddr {
    pub const PFE_BIT: u32 = 23;
    const OP_SHIFT: u32 = 24;
    const WORD_SHIFT: u32 = 7;

    #[must_use]
    pub fn new(op: MeterOp, word: u32, bit_offset: u8, pfe: bool) -> Self {
        let mut raw = (u32::from(op as u8) << Self::OP_SHIFT)
            | ((word & 0xFFFF) << Self::WORD_SHIFT)
            | u32::from(bit_offset & 0x7F);
        if pfe {
            raw |= 1 << Self::PFE_BIT;
        }
        Self(raw)
    }
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw & 0x7FF_FFFF)
    }
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
    #[must_use]
    pub fn op(self) -> MeterOp {
        MeterOp::from_repr(((self.0 >> Self::OP_SHIFT) & 0x7) as u8).unwrap_or(MeterOp::Nop)
    }
    #[must_use]
    pub const fn pfe(self) -> bool {
        (self.0 >> Self::PFE_BIT) & 1 == 1
    }
    #[must_use]
    pub const fn word(self) -> u32 {
        (self.0 >> Self::WORD_SHIFT) & 0xFFFF
    }
    #[must_use]
    pub const fn vpn(self) -> u32 {
        self.word() >> 10
    }
    #[must_use]
    pub const fn index(self) -> u32 {
        self.word() & 0x3FF
    }
    /// Bit offset of the entry within the 128-bit word.
    #[must_use]
    pub const fn bit_offset(self) -> u8 {
        (self.0 & 0x7F) as u8
    }
    /// Stateful address space value (word and offset, no op/PFE) used by the counters.
    #[must_use]
    pub const fn stateful_value(self) -> u64 {
        (self.0 & 0x7F_FFFF) as u64
    }
    #[must_use]
    pub fn from_stateful_value(op: MeterOp, value: u64, pfe: bool) -> Self {
        let word = ((value >> Self::WORD_SHIFT) & 0xFFFF) as u32;
        Self::new(op, word, (value & 0x7F) as u8, pfe)
    }
}

impl Display for MeterAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "meter[{:?} vpn={} idx={} off={}{}]",
            self.op(),
            self.vpn(),
            self.index(),
            self.bit_offset(),
            if self.pfe() { " pfe" } else { "" }
        )
    }
}

/// How a logical table turns a hit index into an ALU address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AddrFormat {
    /// Left shift applied to the hit index.
    pub shift: u8,
    /// Added to the shifted index.
    pub base: u32,
    /// Op inserted into the address (raw 3-bit value).
    pub op: u8,
    pub pfe: bool,
}

impl AddrFormat {
    fn place(&self, hit_index: u32, width: usize) -> u32 {
        let shifted = u64::from(hit_index)
            .checked_shl(u32::from(self.shift))
            .unwrap_or(0);
        (shifted.wrapping_add(u64::from(self.base)) & mask64(width)) as u32
    }

    /// Stats address for a hit. The low 19 bits are word and subword.
    #[must_use]
    pub fn stats_addr(&self, hit_index: u32) -> StatsAddr {
        let mut raw = self.place(hit_index, 19) | (u32::from(self.op & 0x7) << 19);
        if self.pfe {
            raw |= 1 << StatsAddr::PFE_BIT;
        }
        StatsAddr::from_raw(raw)
    }

    /// Meter/stateful/selector address for a hit. The low 23 bits are word and bit offset.
    #[must_use]
    pub fn meter_addr(&self, hit_index: u32) -> MeterAddr {
        let mut raw = self.place(hit_index, 23) | (u32::from(self.op & 0x7) << 24);
        if self.pfe {
            raw |= 1 << MeterAddr::PFE_BIT;
        }
        MeterAddr::from_raw(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn stats_fields() {
        let addr = StatsAddr::new(StatsOp::Stats, (5 << 10) | 17, 3, true);
        assert_eq!(addr.op(), StatsOp::Stats);
        assert_eq!(addr.vpn(), 5);
        assert_eq!(addr.index(), 17);
        assert_eq!(addr.subword(), 3);
        assert!(addr.pfe());
        assert_eq!((addr.raw() >> 19) & 0x7, 4);
        // reserved ops decode as nop
        assert_eq!(StatsAddr::from_raw(7 << 19).op(), StatsOp::Nop);
    }

    #[test]
    fn meter_fields() {
        let addr = MeterAddr::new(MeterOp::Run2, (63 << 10) | 1023, 96, false);
        assert_eq!(addr.op(), MeterOp::Run2);
        assert_eq!(addr.op().instruction(), Some(2));
        assert_eq!(addr.vpn(), 63);
        assert_eq!(addr.index(), 1023);
        assert_eq!(addr.bit_offset(), 96);
        assert!(!addr.pfe());
        let back = MeterAddr::from_stateful_value(MeterOp::Run2, addr.stateful_value(), false);
        assert_eq!(back, addr);
    }

    #[test]
    fn distribution() {
        let fmt = AddrFormat {
            shift: 3,
            base: 2 << 13,
            op: StatsOp::Stats as u8,
            pfe: true,
        };
        let addr = fmt.stats_addr(9);
        assert_eq!(addr.op(), StatsOp::Stats);
        assert_eq!(addr.vpn(), 2);
        assert_eq!(addr.index(), 9);
        assert_eq!(addr.subword(), 0);

        let fmt = AddrFormat {
            shift: 7,
            base: 0,
            op: MeterOp::Run1 as u8,
            pfe: true,
        };
        let addr = fmt.meter_addr(42);
        assert_eq!(addr.op(), MeterOp::Run1);
        assert_eq!(addr.index(), 42);
        assert_eq!(addr.bit_offset(), 0);
        assert!(addr.pfe());
    }
}
