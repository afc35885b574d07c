// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! General purpose stateful ALU.
//!
//! An instruction runs against one entry of a 128-bit RAM word. An entry is `width` bits
//! (`lo`) or, for dual width instructions, `2 * width` bits (`lo` then `hi`). The PHV input
//! supplies `phv_lo = data[0, width)` and `phv_hi = data[width, 2 * width)`.
//!
//! Each instruction has up to four compare ALUs whose outputs index the 16-bit predicate truth
//! tables of the state and output ALUs. `alu1_lo`/`alu2_lo` compete for the low half and
//! `alu1_hi`/`alu2_hi` for the high half; the first predicated ALU of a pair wins.

use crate::address::{MeterAddr, MeterOp};
use crate::chip_salu::{
    ChipStatefulAlu, MinMaxConfig, MinMaxMask, MinMaxResult, apply_post_mod, chip_stateful_alu,
    get_divider_output, get_modulus_output, run_minmax,
};
use crate::error::{MauError, relaxable};
use crate::sram::{MauSram, RamWord};
use arrayvec::ArrayVec;
use bitvector::mask64;
use config::ModelConfig;
use tracing::trace;

/// Most compare ALUs of any chip.
pub const MAX_COMPARE_ALUS: usize = 4;
pub const NUM_INSTRUCTIONS: usize = 4;

/// Sign extend the low `width` bits of `value`.
#[must_use]
pub fn sign_extend(value: u64, width: u32) -> i64 {
    if width == 0 || width >= 64 {
        return value as i64;
    }
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumIter)]
pub enum CmpOp {
    Eq,
    Neq,
    Disabled,
    GtS,
    GeS,
    LeS,
    LtS,
    GtU,
    GeU,
    LeU,
    GtUus,
    GeUus,
    LeUus,
    LtUus,
}

impl CmpOp {
    #[must_use]
    pub fn is_uus(self) -> bool {
        matches!(self, CmpOp::GtUus | CmpOp::GeUus | CmpOp::LeUus | CmpOp::LtUus)
    }

    /// Evaluate `A - B + C OP 0` on `width`-bit operands.
    #[must_use]
    pub fn evaluate(self, a: u64, b: u64, c: i64, width: u32) -> bool {
        let m = mask64(width as usize);
        let (a, b, c) = match self {
            CmpOp::GtS | CmpOp::GeS | CmpOp::LeS | CmpOp::LtS => (
                i128::from(sign_extend(a, width)),
                i128::from(sign_extend(b, width)),
                i128::from(c),
            ),
            CmpOp::GtU | CmpOp::GeU | CmpOp::LeU => (
                i128::from(a & m),
                i128::from(b & m),
                i128::from((c as u64) & m),
            ),
            _ => (i128::from(a & m), i128::from(b & m), i128::from(c)),
        };
        let s = a - b + c;
        match self {
            CmpOp::Disabled => false,
            CmpOp::Eq => s == 0,
            CmpOp::Neq => s != 0,
            CmpOp::GtS | CmpOp::GtU | CmpOp::GtUus => s > 0,
            CmpOp::GeS | CmpOp::GeU | CmpOp::GeUus => s >= 0,
            CmpOp::LeS | CmpOp::LeU | CmpOp::LeUus => s <= 0,
            CmpOp::LtS | CmpOp::LtUus => s < 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    RamLo,
    RamHi,
    PhvLo,
    PhvHi,
    Const(i64),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SbusCombine {
    #[default]
    Or,
    And,
}

/// Combination of a compare output with the same compare output of sibling stateful ALUs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SbusConfig {
    /// Sibling ALUs whose compare outputs are ORed together.
    pub inputs: u8,
    /// How the ORed sibling outputs combine with this ALU's own output.
    pub combine: SbusCombine,
    /// Invert the sibling outputs first.
    pub invert: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CmpAlu {
    pub op: CmpOp,
    pub a: Operand,
    pub b: Operand,
    pub c: i64,
    pub sbus: Option<SbusConfig>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    SaddU,
    SaddS,
    SsubU,
    SsubS,
    SsubrU,
    SsubrS,
    MinU,
    MinS,
    MaxU,
    MaxS,
    Add,
    AddC,
    Sub,
    SubC,
    SubR,
    SubRC,
}

impl ArithOp {
    #[must_use]
    pub fn uses_carry(self) -> bool {
        matches!(self, ArithOp::AddC | ArithOp::SubC | ArithOp::SubRC)
    }

    /// Produces a carry for the high half.
    #[must_use]
    pub fn produces_carry(self) -> bool {
        matches!(self, ArithOp::Add | ArithOp::Sub | ArithOp::SubR)
    }

    /// Returns the result and the carry out.
    #[must_use]
    pub fn apply(self, a: u64, b: u64, carry_in: bool, width: u32) -> (u64, bool) {
        let m = mask64(width as usize);
        let (a, b) = (a & m, b & m);
        let (sa, sb) = (i128::from(sign_extend(a, width)), i128::from(sign_extend(b, width)));
        let smax = i128::from(sign_extend(m >> 1, width));
        let smin = -smax - 1;
        let clamp = |v: i128| (v.clamp(smin, smax) as u64) & m;
        let carry_add = |x: u64, y: u64, cin: u64| {
            let sum = u128::from(x) + u128::from(y) + u128::from(cin);
            ((sum as u64) & m, (sum >> width) & 1 == 1)
        };
        let cin = u64::from(carry_in);
        match self {
            ArithOp::SaddU => ((u128::from(a) + u128::from(b)).min(u128::from(m)) as u64, false),
            ArithOp::SaddS => (clamp(sa + sb), false),
            ArithOp::SsubU => (a.saturating_sub(b), false),
            ArithOp::SsubS => (clamp(sa - sb), false),
            ArithOp::SsubrU => (b.saturating_sub(a), false),
            ArithOp::SsubrS => (clamp(sb - sa), false),
            ArithOp::MinU => (a.min(b), false),
            ArithOp::MaxU => (a.max(b), false),
            ArithOp::MinS => (if sa <= sb { a } else { b }, false),
            ArithOp::MaxS => (if sa >= sb { a } else { b }, false),
            ArithOp::Add => carry_add(a, b, 0),
            ArithOp::AddC => carry_add(a, b, cin),
            ArithOp::Sub => carry_add(a, !b & m, 1),
            ArithOp::SubC => carry_add(a, !b & m, cin),
            ArithOp::SubR => carry_add(b, !a & m, 1),
            ArithOp::SubRC => carry_add(b, !a & m, cin),
        }
    }
}

/// The sixteen two-input Boolean functions. Bit `(a << 1) | b` of the discriminant is the
/// output for inputs `a` and `b`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::FromRepr)]
#[repr(u8)]
pub enum LogicOp {
    SetZ = 0,
    Nor = 1,
    AndCA = 2,
    NotA = 3,
    AndCB = 4,
    NotB = 5,
    Xor = 6,
    Nand = 7,
    And = 8,
    Xnor = 9,
    B = 10,
    OrCA = 11,
    A = 12,
    OrCB = 13,
    Or = 14,
    SetHi = 15,
}

impl LogicOp {
    #[must_use]
    pub fn apply(self, a: u64, b: u64, width: u32) -> u64 {
        let t = self as u8;
        let mut out = 0;
        if t & 1 != 0 {
            out |= !a & !b;
        }
        if t & 2 != 0 {
            out |= !a & b;
        }
        if t & 4 != 0 {
            out |= a & !b;
        }
        if t & 8 != 0 {
            out |= a & b;
        }
        out & mask64(width as usize)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluOp {
    Arith(ArithOp),
    Logic(LogicOp),
}

/// One of the four state update ALUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateAlu {
    /// Truth table over the compare outputs.
    pub predicate: u16,
    pub op: AluOp,
    pub a: Operand,
    pub b: Operand,
}

/// Single bit instructions. The output is the old bit, complemented for the `C` variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OneBitOp {
    ReadBit,
    ReadBitC,
    SetBit,
    SetBitC,
    ClrBit,
    ClrBitC,
}

impl OneBitOp {
    /// Returns the new bit and the output.
    #[must_use]
    pub fn apply(self, old: bool) -> (bool, bool) {
        match self {
            OneBitOp::ReadBit => (old, old),
            OneBitOp::ReadBitC => (old, !old),
            OneBitOp::SetBit => (true, old),
            OneBitOp::SetBitC => (true, !old),
            OneBitOp::ClrBit => (false, old),
            OneBitOp::ClrBitC => (false, !old),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputSource {
    RamLo,
    RamHi,
    AluLo,
    AluHi,
    PhvLo,
    PhvHi,
    Predicate,
    Compare,
    Div,
    Mod,
    MinMaxIndex,
    MinMaxValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputAlu {
    pub predicate: u16,
    pub source: OutputSource,
}

/// Operands of the divide/modulo unit, taken as 16-bit signed values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DivideConfig {
    pub a: Operand,
    pub b: Operand,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaluInstruction {
    pub cmp: ArrayVec<CmpAlu, MAX_COMPARE_ALUS>,
    pub alu1_lo: Option<StateAlu>,
    pub alu2_lo: Option<StateAlu>,
    pub alu1_hi: Option<StateAlu>,
    pub alu2_hi: Option<StateAlu>,
    /// Single bit instruction; only meaningful for width 1.
    pub one_bit: Option<OneBitOp>,
    pub output: Option<OutputAlu>,
    /// Divide/modulo unit, enabled when present.
    pub divide: Option<DivideConfig>,
    pub minmax: Option<MinMaxConfig>,
}

impl SaluInstruction {
    pub fn state_alus(&self) -> impl Iterator<Item = &StateAlu> {
        [&self.alu1_lo, &self.alu2_lo, &self.alu1_hi, &self.alu2_hi]
            .into_iter()
            .flatten()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatefulAluConfig {
    /// Width of one half: 1, 8, 16, 32 or 64.
    pub width: u32,
    pub dual: bool,
    pub instructions: [SaluInstruction; NUM_INSTRUCTIONS],
}

impl Default for StatefulAluConfig {
    fn default() -> Self {
        Self {
            width: 32,
            dual: false,
            instructions: Default::default(),
        }
    }
}

impl StatefulAluConfig {
    /// Bits occupied by one entry.
    #[must_use]
    pub fn entry_bits(&self) -> u32 {
        if self.dual { self.width * 2 } else { self.width }
    }
}

/// Result of one stateful ALU run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaluOutput {
    /// Value delivered to the action data bus.
    pub action_data: u64,
    /// Compare ALU outputs after sbus combination, bit per compare ALU.
    pub compare: u8,
}

#[derive(Clone, Copy, Debug)]
struct LastRun {
    word: u32,
    time: u64,
    input: RamWord,
}

struct Operands {
    lo: u64,
    hi: u64,
    phv_lo: u64,
    phv_hi: u64,
    width: u32,
}

impl Operands {
    fn get(&self, op: Operand) -> u64 {
        match op {
            Operand::RamLo => self.lo,
            Operand::RamHi => self.hi,
            Operand::PhvLo => self.phv_lo,
            Operand::PhvHi => self.phv_hi,
            Operand::Const(c) => (c as u64) & mask64(self.width as usize),
        }
    }
}

#[derive(Debug)]
pub struct MauStatefulAlu {
    alu: usize,
    config: StatefulAluConfig,
    chip: Box<dyn ChipStatefulAlu>,
    relax_divide_check: bool,
    relax_carry_check: bool,
    ram: MauSram,
    last: Option<LastRun>,
}

fn predicated(table: u16, index: u8) -> bool {
    (table >> (index & 0xF)) & 1 == 1
}

impl MauStatefulAlu {
    pub fn new(
        alu: usize,
        config: StatefulAluConfig,
        model: &ModelConfig,
    ) -> Result<Self, MauError> {
        let chip = chip_stateful_alu(model.chip);
        Self::validate(chip.as_ref(), &config)?;
        Ok(Self {
            alu,
            config,
            chip,
            relax_divide_check: model.relax_divide_check,
            relax_carry_check: model.relax_carry_check,
            ram: MauSram::new(),
            last: None,
        })
    }

    fn validate(chip: &dyn ChipStatefulAlu, config: &StatefulAluConfig) -> Result<(), MauError> {
        if ![1, 8, 16, 32, 64].contains(&config.width) || (config.width == 1 && config.dual) {
            return Err(MauError::InvalidConfig(format!(
                "stateful width {}{} is not supported",
                config.width,
                if config.dual { " dual" } else { "" }
            )));
        }
        config.instructions.iter().try_for_each(|i| chip.validate(i))
    }

    pub fn set_config(&mut self, config: StatefulAluConfig) -> Result<(), MauError> {
        Self::validate(self.chip.as_ref(), &config)?;
        self.config = config;
        Ok(())
    }

    #[must_use]
    pub fn config(&self) -> &StatefulAluConfig {
        &self.config
    }

    #[must_use]
    pub fn ram(&self) -> &MauSram {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut MauSram {
        &mut self.ram
    }

    fn entry_offset(&self, addr: MeterAddr) -> usize {
        let bits = self.config.entry_bits() as usize;
        let offset = usize::from(addr.bit_offset());
        if bits >= 128 { 0 } else { offset - offset % bits }
    }

    /// Run the op carried by `addr`.
    ///
    /// `sbus_in` holds the compare outputs of the sibling stateful ALUs that already ran
    /// this cycle, indexed by ALU.
    pub fn run_alu_with_state(
        &mut self,
        addr: MeterAddr,
        phv_data: &RamWord,
        time: u64,
        sbus_in: &[u8],
    ) -> Result<SaluOutput, MauError> {
        let w = self.config.width;
        let wu = w as usize;
        let offset = self.entry_offset(addr);
        let word_addr = addr.word();
        let mut word = self.ram.read(word_addr);
        let Some(index) = addr.op().instruction() else {
            return Ok(match addr.op() {
                MeterOp::CfgRd => SaluOutput {
                    action_data: word.get_word(offset, wu),
                    compare: 0,
                },
                MeterOp::CfgWr => {
                    word.set_word(phv_data.get_word(0, wu), offset, wu);
                    if self.config.dual {
                        word.set_word(phv_data.get_word(wu, wu), offset + wu, wu);
                    }
                    self.ram.write(word_addr, word);
                    SaluOutput::default()
                }
                _ => SaluOutput::default(),
            });
        };

        let forwarded = match self.last {
            Some(last) if last.word == word_addr && time == last.time.wrapping_add(1) => {
                Some(last.input)
            }
            _ => None,
        };
        self.last = Some(LastRun {
            word: word_addr,
            time,
            input: word,
        });
        let instr = &self.config.instructions[index];

        if w == 1 {
            let old = word.get_bit(offset);
            let (new, out) = instr.one_bit.map_or((old, old), |op| op.apply(old));
            word.set_bit_to(offset, new);
            self.ram.write(word_addr, word);
            trace!(alu = self.alu, "{addr}: bit {old} -> {new}");
            return Ok(SaluOutput {
                action_data: u64::from(out),
                compare: 0,
            });
        }

        let ops = Operands {
            lo: word.get_word(offset, wu),
            hi: if self.config.dual {
                word.get_word(offset + wu, wu)
            } else {
                0
            },
            phv_lo: phv_data.get_word(0, wu),
            phv_hi: phv_data.get_word(wu, wu),
            width: w,
        };

        // compare
        let mut compare = 0u8;
        for (i, cmp) in instr.cmp.iter().enumerate() {
            let mut out = cmp.op.evaluate(ops.get(cmp.a), ops.get(cmp.b), cmp.c, w);
            if let Some(sbus) = cmp.sbus {
                let mut others = sbus_in
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| sbus.inputs & (1 << j) != 0)
                    .any(|(_, c)| c & (1 << i) != 0);
                if sbus.invert {
                    others = !others;
                }
                out = match sbus.combine {
                    SbusCombine::Or => out || others,
                    SbusCombine::And => out && others,
                };
            }
            compare |= u8::from(out) << i;
        }

        // state update, low half first so its carry feeds the high half
        let mut carry = None;
        let mut new_lo = ops.lo;
        if let Some(alu) = [instr.alu1_lo, instr.alu2_lo]
            .into_iter()
            .flatten()
            .find(|alu| predicated(alu.predicate, compare))
        {
            let (value, carry_out) = match alu.op {
                AluOp::Arith(op) => {
                    let (v, c) = op.apply(ops.get(alu.a), ops.get(alu.b), false, w);
                    (v, op.produces_carry().then_some(c))
                }
                AluOp::Logic(op) => (op.apply(ops.get(alu.a), ops.get(alu.b), w), None),
            };
            new_lo = value;
            carry = carry_out;
        }
        let mut new_hi = ops.hi;
        if let Some(alu) = [instr.alu1_hi, instr.alu2_hi]
            .into_iter()
            .flatten()
            .find(|alu| predicated(alu.predicate, compare))
        {
            new_hi = match alu.op {
                AluOp::Arith(op) => {
                    if op.uses_carry() && carry.is_none() {
                        let err = MauError::CarryWithoutAdd { alu: self.alu };
                        relaxable(self.relax_carry_check, err)?;
                    }
                    op.apply(ops.get(alu.a), ops.get(alu.b), carry.unwrap_or(false), w).0
                }
                AluOp::Logic(op) => op.apply(ops.get(alu.a), ops.get(alu.b), w),
            };
        }
        word.set_word(new_lo, offset, wu);
        if self.config.dual {
            word.set_word(new_hi, offset + wu, wu);
        }

        let divided = instr.divide.map(|d| {
            let a = ops.get(d.a) as u16 as i16;
            let b = ops.get(d.b) as u16 as i16;
            (get_divider_output(a, b), get_modulus_output(a, b))
        });

        let minmax: Option<MinMaxResult> = instr.minmax.and_then(|cfg| {
            let mask = match cfg.mask {
                MinMaxMask::Phv => (ops.phv_lo & 0xFFFF) as u16,
                MinMaxMask::Const(m) => m,
            };
            let source = forwarded.unwrap_or(word);
            let result = run_minmax(&cfg, &source, mask);
            if let Some(r) = result {
                apply_post_mod(&cfg, &mut word, r.index);
            }
            result
        });
        self.ram.write(word_addr, word);

        let action_data = match instr.output {
            Some(out) if predicated(out.predicate, compare) => match out.source {
                OutputSource::RamLo => ops.lo,
                OutputSource::RamHi => ops.hi,
                OutputSource::AluLo => new_lo,
                OutputSource::AluHi => new_hi,
                OutputSource::PhvLo => ops.phv_lo,
                OutputSource::PhvHi => ops.phv_hi,
                OutputSource::Predicate => 1u64 << (compare & 0xF),
                OutputSource::Compare => u64::from(compare),
                OutputSource::Div | OutputSource::Mod => match divided {
                    Some((q, r)) => u64::from(if out.source == OutputSource::Div { q } else { r }),
                    None => {
                        let err = MauError::DivideDisabled { alu: self.alu };
                        relaxable(self.relax_divide_check, err)?;
                        0
                    }
                },
                OutputSource::MinMaxIndex | OutputSource::MinMaxValue => {
                    if instr.minmax.is_none() {
                        return Err(MauError::InvalidConfig(format!(
                            "stateful ALU {}: min/max output without a min/max unit",
                            self.alu
                        )));
                    }
                    match (minmax, out.source) {
                        (Some(r), OutputSource::MinMaxIndex) => u64::from(r.index),
                        (Some(r), _) => r.value,
                        (None, _) => 0,
                    }
                }
            },
            _ => 0,
        };
        trace!(
            alu = self.alu,
            "{addr}: lo {:#x} -> {new_lo:#x}, hi {:#x} -> {new_hi:#x}, \
             cmp {compare:#x}, out {action_data:#x}",
            ops.lo,
            ops.hi
        );
        Ok(SaluOutput {
            action_data,
            compare,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip_salu::{MinMaxOp, MinMaxSize, PostMod};
    use config::{Chip, ModelConfigBuilder};
    use pretty_assertions::assert_eq;

    fn model(chip: Chip) -> ModelConfig {
        ModelConfigBuilder::default()
            .chip(chip)
            .build()
            .expect("valid config")
    }

    fn run_addr(instr: u8, word: u32, offset: u8) -> MeterAddr {
        let op = MeterOp::from_repr(4 + instr).expect("run op");
        MeterAddr::new(op, word, offset, true)
    }

    fn cmp(op: CmpOp, a: Operand, b: Operand, c: i64) -> CmpAlu {
        CmpAlu { op, a, b, c, sbus: None }
    }

    fn only(instr: SaluInstruction) -> [SaluInstruction; 4] {
        [instr, SaluInstruction::default(), SaluInstruction::default(), SaluInstruction::default()]
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0xFF, 8), -1);
        assert_eq!(sign_extend(0x7F, 8), 127);
        assert_eq!(sign_extend(0x8000, 16), -32768);
        assert_eq!(sign_extend(u64::MAX, 64), -1);
    }

    #[test]
    fn compare_ops() {
        // 8 bit: a = -2 (0xFE), b = 3
        assert!(CmpOp::LtS.evaluate(0xFE, 3, 0, 8));
        assert!(CmpOp::GtU.evaluate(0xFE, 3, 0, 8));
        assert!(CmpOp::GeS.evaluate(5, 3, -2, 8));
        assert!(!CmpOp::GtS.evaluate(5, 3, -2, 8));
        assert!(CmpOp::Eq.evaluate(7, 7, 0, 8));
        assert!(CmpOp::Neq.evaluate(7, 6, 0, 8));
        assert!(!CmpOp::Disabled.evaluate(7, 6, 0, 8));
        // uus: unsigned operands, signed constant
        assert!(CmpOp::LtUus.evaluate(3, 4, 0, 8));
        assert!(CmpOp::GeUus.evaluate(3, 4, 1, 8));
        assert!(CmpOp::LeU.evaluate(0, 0xFF, 0, 8));
        // 64 bit operands do not overflow
        assert!(CmpOp::GtU.evaluate(u64::MAX, 0, 0, 64));
        assert!(CmpOp::LtS.evaluate(u64::MAX, 0, 0, 64));
    }

    #[test]
    fn arithmetic_saturates() {
        assert_eq!(ArithOp::SaddU.apply(0xF0, 0x20, false, 8), (0xFF, false));
        assert_eq!(ArithOp::SaddS.apply(0x70, 0x20, false, 8), (0x7F, false));
        assert_eq!(ArithOp::SaddS.apply(0x90, 0x90, false, 8), (0x80, false));
        assert_eq!(ArithOp::SsubU.apply(3, 5, false, 8).0, 0);
        assert_eq!(ArithOp::SsubrU.apply(3, 5, false, 8).0, 2);
        assert_eq!(ArithOp::SsubS.apply(0x80, 1, false, 8).0, 0x80);
        assert_eq!(ArithOp::MinS.apply(0xFF, 1, false, 8).0, 0xFF);
        assert_eq!(ArithOp::MinU.apply(0xFF, 1, false, 8).0, 1);
        assert_eq!(ArithOp::MaxS.apply(0xFF, 1, false, 8).0, 1);
        assert_eq!(ArithOp::Add.apply(0xFF, 1, false, 8), (0, true));
        assert_eq!(ArithOp::Sub.apply(1, 2, false, 8), (0xFF, false));
        assert_eq!(ArithOp::Sub.apply(2, 1, false, 8), (1, true));
        assert_eq!(ArithOp::SubR.apply(1, 3, false, 8), (2, true));
        assert_eq!(ArithOp::SaddU.apply(u64::MAX, 1, false, 64).0, u64::MAX);
    }

    #[test]
    fn logic_ops_match_truth_tables() {
        let (a, b) = (0b1100u64, 0b1010u64);
        assert_eq!(LogicOp::And.apply(a, b, 4), 0b1000);
        assert_eq!(LogicOp::Or.apply(a, b, 4), 0b1110);
        assert_eq!(LogicOp::Xor.apply(a, b, 4), 0b0110);
        assert_eq!(LogicOp::Nor.apply(a, b, 4), 0b0001);
        assert_eq!(LogicOp::AndCA.apply(a, b, 4), 0b0010);
        assert_eq!(LogicOp::OrCB.apply(a, b, 4), 0b1101);
        assert_eq!(LogicOp::A.apply(a, b, 4), a);
        assert_eq!(LogicOp::NotB.apply(a, b, 4), 0b0101);
        assert_eq!(LogicOp::SetHi.apply(a, b, 4), 0xF);
        assert_eq!(LogicOp::SetZ.apply(a, b, 4), 0);
    }

    #[test]
    fn counter_with_predicated_reset() {
        // if ram_lo >= 10 then ram_lo = 0 else ram_lo += 1; output the old value
        let mut instr = SaluInstruction::default();
        instr.cmp.push(cmp(CmpOp::GeU, Operand::RamLo, Operand::Const(10), 0));
        instr.alu1_lo = Some(StateAlu {
            predicate: 0b10,
            op: AluOp::Logic(LogicOp::SetZ),
            a: Operand::RamLo,
            b: Operand::RamLo,
        });
        instr.alu2_lo = Some(StateAlu {
            predicate: 0xFFFF,
            op: AluOp::Arith(ArithOp::Add),
            a: Operand::RamLo,
            b: Operand::Const(1),
        });
        instr.output = Some(OutputAlu {
            predicate: 0xFFFF,
            source: OutputSource::RamLo,
        });
        let config = StatefulAluConfig {
            width: 16,
            dual: false,
            instructions: only(instr),
        };
        let mut alu = MauStatefulAlu::new(0, config, &model(Chip::Tofino)).expect("valid config");
        let addr = run_addr(0, 5, 16);
        let mut seen = Vec::new();
        for t in 0..12 {
            let out = alu.run_alu_with_state(addr, &RamWord::new(), t * 10, &[]).expect("runs");
            seen.push(out.action_data);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 0]);
        assert_eq!(alu.ram().read(5).get_word(16, 16), 1);
        assert_eq!(alu.ram().read(5).get_word(0, 16), 0);
    }

    #[test]
    fn dual_width_carry_chain() {
        let mut instr = SaluInstruction::default();
        instr.alu1_lo = Some(StateAlu {
            predicate: 0xFFFF,
            op: AluOp::Arith(ArithOp::Add),
            a: Operand::RamLo,
            b: Operand::PhvLo,
        });
        instr.alu1_hi = Some(StateAlu {
            predicate: 0xFFFF,
            op: AluOp::Arith(ArithOp::AddC),
            a: Operand::RamHi,
            b: Operand::PhvHi,
        });
        let config = StatefulAluConfig {
            width: 64,
            dual: true,
            instructions: only(instr.clone()),
        };
        assert!(matches!(
            MauStatefulAlu::new(0, config.clone(), &model(Chip::Tofino)),
            Err(MauError::Unsupported { feature: "carry chain", .. })
        ));
        let mut alu = MauStatefulAlu::new(0, config, &model(Chip::JBay)).expect("valid config");
        let addr = run_addr(0, 1, 0);
        let mut start = RamWord::new();
        start.set_word(u64::MAX, 0, 64);
        start.set_word(7, 64, 64);
        alu.ram_mut().write(1, start);
        let phv = RamWord::from_u128(1);
        alu.run_alu_with_state(addr, &phv, 0, &[]).expect("runs");
        assert_eq!(alu.ram().read(1).to_u128(), 8u128 << 64);
    }

    #[test]
    fn carry_without_low_add() {
        let mut instr = SaluInstruction::default();
        instr.alu1_hi = Some(StateAlu {
            predicate: 0xFFFF,
            op: AluOp::Arith(ArithOp::AddC),
            a: Operand::RamHi,
            b: Operand::Const(1),
        });
        let config = StatefulAluConfig {
            width: 32,
            dual: true,
            instructions: only(instr),
        };
        let mut alu =
            MauStatefulAlu::new(3, config.clone(), &model(Chip::JBay)).expect("valid config");
        assert_eq!(
            alu.run_alu_with_state(run_addr(0, 0, 0), &RamWord::new(), 0, &[]),
            Err(MauError::CarryWithoutAdd { alu: 3 })
        );
        let relaxed = ModelConfigBuilder::default()
            .chip(Chip::JBay)
            .relax_carry_check(true)
            .build()
            .expect("valid config");
        let mut alu = MauStatefulAlu::new(3, config, &relaxed).expect("valid config");
        alu.run_alu_with_state(run_addr(0, 0, 0), &RamWord::new(), 0, &[]).expect("relaxed");
        assert_eq!(alu.ram().read(0).get_word(32, 32), 1);
    }

    #[test]
    fn one_bit_ops() {
        let mut set = SaluInstruction::default();
        set.one_bit = Some(OneBitOp::SetBitC);
        let mut clr = SaluInstruction::default();
        clr.one_bit = Some(OneBitOp::ClrBit);
        let config = StatefulAluConfig {
            width: 1,
            dual: false,
            instructions: [set, clr, SaluInstruction::default(), SaluInstruction::default()],
        };
        let mut alu = MauStatefulAlu::new(0, config, &model(Chip::Tofino)).expect("valid config");
        let out = alu
            .run_alu_with_state(run_addr(0, 2, 77), &RamWord::new(), 0, &[])
            .expect("runs");
        assert_eq!(out.action_data, 1);
        assert!(alu.ram().read(2).get_bit(77));
        let out = alu
            .run_alu_with_state(run_addr(0, 2, 77), &RamWord::new(), 5, &[])
            .expect("runs");
        assert_eq!(out.action_data, 0);
        let out = alu
            .run_alu_with_state(run_addr(1, 2, 77), &RamWord::new(), 9, &[])
            .expect("runs");
        assert_eq!(out.action_data, 1);
        assert!(!alu.ram().read(2).get_bit(77));
    }

    #[test]
    fn sbus_combines_sibling_compares() {
        let mut instr = SaluInstruction::default();
        let mut c = cmp(CmpOp::Disabled, Operand::RamLo, Operand::RamLo, 0);
        c.sbus = Some(SbusConfig {
            inputs: 0b0100,
            combine: SbusCombine::Or,
            invert: false,
        });
        instr.cmp.push(c);
        instr.output = Some(OutputAlu {
            predicate: 0xFFFF,
            source: OutputSource::Compare,
        });
        let config = StatefulAluConfig {
            width: 8,
            dual: false,
            instructions: only(instr),
        };
        let mut alu = MauStatefulAlu::new(0, config, &model(Chip::Tofino)).expect("valid config");
        let addr = run_addr(0, 0, 0);
        let out = alu.run_alu_with_state(addr, &RamWord::new(), 0, &[0, 1, 0]).expect("runs");
        assert_eq!(out.compare, 0);
        let out = alu.run_alu_with_state(addr, &RamWord::new(), 10, &[0, 0, 1]).expect("runs");
        assert_eq!(out.compare, 1);
        assert_eq!(out.action_data, 1);
    }

    #[test]
    fn divide_output_requires_divider() {
        let mut instr = SaluInstruction::default();
        instr.output = Some(OutputAlu {
            predicate: 0xFFFF,
            source: OutputSource::Div,
        });
        let mut config = StatefulAluConfig {
            width: 16,
            dual: true,
            instructions: only(instr.clone()),
        };
        let mut alu =
            MauStatefulAlu::new(1, config.clone(), &model(Chip::JBay)).expect("valid config");
        let addr = run_addr(0, 0, 0);
        assert_eq!(
            alu.run_alu_with_state(addr, &RamWord::new(), 0, &[]),
            Err(MauError::DivideDisabled { alu: 1 })
        );

        config.instructions[0].divide = Some(DivideConfig {
            a: Operand::PhvLo,
            b: Operand::PhvHi,
        });
        alu.set_config(config.clone()).expect("valid config");
        // -7 / 2 in the phv halves
        let phv = RamWord::from_u64(0x0002_FFF9);
        let out = alu.run_alu_with_state(addr, &phv, 100, &[]).expect("runs");
        assert_eq!(out.action_data, u64::from((-3i16) as u16));
        config.instructions[0].output = Some(OutputAlu {
            predicate: 0xFFFF,
            source: OutputSource::Mod,
        });
        alu.set_config(config).expect("valid config");
        let out = alu.run_alu_with_state(addr, &phv, 200, &[]).expect("runs");
        assert_eq!(out.action_data, 1);
    }

    #[test]
    fn minmax_uses_forwarded_input() {
        let mut instr = SaluInstruction::default();
        instr.minmax = Some(MinMaxConfig {
            op: MinMaxOp::Min,
            size: MinMaxSize::Bits16,
            mask: MinMaxMask::Phv,
            highest_index_wins: false,
            post: PostMod::Increment,
        });
        instr.output = Some(OutputAlu {
            predicate: 0xFFFF,
            source: OutputSource::MinMaxIndex,
        });
        let config = StatefulAluConfig {
            width: 64,
            dual: true,
            instructions: only(instr),
        };
        let mut alu = MauStatefulAlu::new(0, config, &model(Chip::JBay)).expect("valid config");
        let mut start = RamWord::new();
        for i in 0..8 {
            start.set_word(10 + i as u64, i * 16, 16);
        }
        start.set_word(5, 32, 16);
        alu.ram_mut().write(4, start);
        let addr = run_addr(0, 4, 0);
        let phv = RamWord::from_u64(0xFF);
        // subword 2 holds the minimum 5, incremented to 6
        assert_eq!(alu.run_alu_with_state(addr, &phv, 10, &[]).expect("runs").action_data, 2);
        // back to back: still sees 5 at subword 2, increments the written value to 7
        assert_eq!(alu.run_alu_with_state(addr, &phv, 11, &[]).expect("runs").action_data, 2);
        assert_eq!(alu.ram().read(4).get_word(32, 16), 7);
        // later: no forwarding, subword 2 still holds the minimum 7
        assert_eq!(alu.run_alu_with_state(addr, &phv, 20, &[]).expect("runs").action_data, 2);
        assert_eq!(alu.ram().read(4).get_word(32, 16), 8);
    }

    #[test]
    fn compare_alu_count_is_checked() {
        let mut instr = SaluInstruction::default();
        for _ in 0..3 {
            instr.cmp.push(cmp(CmpOp::Eq, Operand::RamLo, Operand::PhvLo, 0));
        }
        let config = StatefulAluConfig {
            width: 32,
            dual: false,
            instructions: only(instr),
        };
        assert!(matches!(
            MauStatefulAlu::new(0, config.clone(), &model(Chip::Tofino)),
            Err(MauError::InvalidConfig(_))
        ));
        assert!(MauStatefulAlu::new(0, config, &model(Chip::JBay)).is_ok());
    }
}
