// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Chip specific parts of the stateful ALU: feature availability, the divide/modulo unit and
//! the min/max unit.

use crate::error::MauError;
use crate::sram::RamWord;
use crate::stateful_alu::{AluOp, SaluInstruction};
use config::Chip;
use std::fmt::Debug;

/// What a chip generation's stateful ALU can do.
pub trait ChipStatefulAlu: Debug + Send + Sync {
    fn chip(&self) -> Chip;
    fn num_compare_alus(&self) -> usize;
    fn supports_uus(&self) -> bool;
    fn supports_carry(&self) -> bool;
    fn supports_divide(&self) -> bool;
    fn supports_minmax(&self) -> bool;

    /// Reject instructions using features this chip does not have.
    fn validate(&self, instr: &SaluInstruction) -> Result<(), MauError> {
        let unsupported = |feature| MauError::Unsupported {
            feature,
            chip: self.chip(),
        };
        if instr.cmp.len() > self.num_compare_alus() {
            return Err(MauError::InvalidConfig(format!(
                "{} compare ALUs configured, {} has {}",
                instr.cmp.len(),
                self.chip(),
                self.num_compare_alus()
            )));
        }
        if !self.supports_uus() && instr.cmp.iter().any(|c| c.op.is_uus()) {
            return Err(unsupported("uus compare"));
        }
        let uses_carry = instr
            .state_alus()
            .any(|alu| matches!(alu.op, AluOp::Arith(op) if op.uses_carry()));
        if !self.supports_carry() && uses_carry {
            return Err(unsupported("carry chain"));
        }
        if !self.supports_divide() && instr.divide.is_some() {
            return Err(unsupported("divide/modulo"));
        }
        if !self.supports_minmax() && instr.minmax.is_some() {
            return Err(unsupported("min/max"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TofinoStatefulAlu;

impl ChipStatefulAlu for TofinoStatefulAlu {
    fn chip(&self) -> Chip {
        Chip::Tofino
    }
    fn num_compare_alus(&self) -> usize {
        Chip::Tofino.num_compare_alus()
    }
    fn supports_uus(&self) -> bool {
        false
    }
    fn supports_carry(&self) -> bool {
        false
    }
    fn supports_divide(&self) -> bool {
        false
    }
    fn supports_minmax(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct JBayStatefulAlu;

impl ChipStatefulAlu for JBayStatefulAlu {
    fn chip(&self) -> Chip {
        Chip::JBay
    }
    fn num_compare_alus(&self) -> usize {
        Chip::JBay.num_compare_alus()
    }
    fn supports_uus(&self) -> bool {
        true
    }
    fn supports_carry(&self) -> bool {
        true
    }
    fn supports_divide(&self) -> bool {
        true
    }
    fn supports_minmax(&self) -> bool {
        true
    }
}

#[must_use]
pub fn chip_stateful_alu(chip: Chip) -> Box<dyn ChipStatefulAlu> {
    match chip {
        Chip::Tofino => Box::new(TofinoStatefulAlu),
        Chip::JBay => Box::new(JBayStatefulAlu),
    }
}

/// 16-bit signed division. Division by zero saturates towards the sign of the dividend.
#[must_use]
pub fn get_divider_output(as16: i16, bs16: i16) -> u16 {
    if bs16 == 0 {
        return if as16 >= 0 { 0x7FFF } else { 0x8000 };
    }
    let q = i32::from(as16) / i32::from(bs16);
    (q & 0xFFFF) as u16
}

/// 16-bit signed modulus with the sign of the divisor. Modulus by zero yields the dividend.
#[must_use]
pub fn get_modulus_output(as16: i16, bs16: i16) -> u16 {
    if bs16 == 0 {
        return as16 as u16;
    }
    let (a, b) = (i32::from(as16), i32::from(bs16));
    let mut r = a % b;
    if r != 0 && (r < 0) != (b < 0) {
        r += b;
    }
    (r & 0xFFFF) as u16
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MinMaxOp {
    #[default]
    Min,
    Max,
}

/// Subword layout of the min/max unit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MinMaxSize {
    /// Sixteen 8-bit values.
    Bits8,
    /// Eight 16-bit values.
    #[default]
    Bits16,
}

impl MinMaxSize {
    #[must_use]
    pub const fn bits(self) -> usize {
        match self {
            MinMaxSize::Bits8 => 8,
            MinMaxSize::Bits16 => 16,
        }
    }
    #[must_use]
    pub const fn count(self) -> usize {
        128 / self.bits()
    }
}

/// Where the min/max participation mask comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MinMaxMask {
    /// Low 16 bits of the PHV input.
    Phv,
    Const(u16),
}

impl Default for MinMaxMask {
    fn default() -> Self {
        MinMaxMask::Const(0xFFFF)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PostMod {
    #[default]
    None,
    Increment,
    Decrement,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MinMaxConfig {
    pub op: MinMaxOp,
    pub size: MinMaxSize,
    pub mask: MinMaxMask,
    /// On a tie pick the highest index rather than the lowest.
    pub highest_index_wins: bool,
    pub post: PostMod,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MinMaxResult {
    pub index: u8,
    pub value: u64,
}

/// Find the min or max of the subwords of `word` enabled in `mask` (bit per subword).
#[must_use]
pub fn run_minmax(cfg: &MinMaxConfig, word: &RamWord, mask: u16) -> Option<MinMaxResult> {
    let bits = cfg.size.bits();
    let mut best: Option<MinMaxResult> = None;
    for i in 0..cfg.size.count() {
        if mask & (1 << i) == 0 {
            continue;
        }
        let value = word.get_word(i * bits, bits);
        let better = match best {
            None => true,
            Some(b) => match cfg.op {
                MinMaxOp::Min => value < b.value || (value == b.value && cfg.highest_index_wins),
                MinMaxOp::Max => value > b.value || (value == b.value && cfg.highest_index_wins),
            },
        };
        if better {
            best = Some(MinMaxResult {
                index: i as u8,
                value,
            });
        }
    }
    best
}

/// Apply the configured post increment/decrement to subword `index` of `word`, saturating.
pub fn apply_post_mod(cfg: &MinMaxConfig, word: &mut RamWord, index: u8) {
    let bits = cfg.size.bits();
    let offset = usize::from(index) * bits;
    let value = word.get_word(offset, bits);
    let max = bitvector::mask64(bits);
    let new = match cfg.post {
        PostMod::None => return,
        PostMod::Increment => (value + 1).min(max),
        PostMod::Decrement => value.saturating_sub(1),
    };
    word.set_word(new, offset, bits);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn divide_by_zero_saturates() {
        assert_eq!(get_divider_output(5, 0), 0x7FFF);
        assert_eq!(get_divider_output(0, 0), 0x7FFF);
        assert_eq!(get_divider_output(-5, 0), 0x8000);
        assert_eq!(get_modulus_output(-5, 0), 0xFFFB);
        assert_eq!(get_modulus_output(1234, 0), 1234);
    }

    #[test]
    fn division_truncates() {
        assert_eq!(get_divider_output(7, 2), 3);
        assert_eq!(get_divider_output(-7, 2), (-3i16) as u16);
        assert_eq!(get_divider_output(i16::MIN, -1), 0x8000);
    }

    #[test]
    fn modulus_follows_divisor_sign() {
        assert_eq!(get_modulus_output(7, 3), 1);
        assert_eq!(get_modulus_output(-7, 3), 2);
        assert_eq!(get_modulus_output(7, -3), (-2i16) as u16);
        assert_eq!(get_modulus_output(-7, -3), (-1i16) as u16);
        assert_eq!(get_modulus_output(6, -3), 0);
    }

    #[test]
    fn divider_matches_reference() {
        bolero::check!()
            .with_type::<(i16, i16)>()
            .cloned()
            .for_each(|(a, b)| {
                let q = get_divider_output(a, b);
                let r = get_modulus_output(a, b);
                if b == 0 {
                    assert_eq!(q, if a >= 0 { 0x7FFF } else { 0x8000 });
                    assert_eq!(r, a as u16);
                } else {
                    let r = i32::from(r as i16);
                    let b = i32::from(b);
                    assert!(r == 0 || (r < 0) == (b < 0));
                    assert!(r.abs() < b.abs());
                    assert_eq!((i32::from(a) - r).rem_euclid(b), 0);
                }
            });
    }

    #[test]
    fn minmax_with_ties_and_mask() {
        let mut word = RamWord::new();
        for (i, v) in [9u64, 3, 7, 3, 12, 1, 3, 5].iter().enumerate() {
            word.set_word(*v, i * 16, 16);
        }
        let mut cfg = MinMaxConfig::default();
        assert_eq!(run_minmax(&cfg, &word, 0xFF), Some(MinMaxResult { index: 5, value: 1 }));
        // subword 5 masked out: tie between 1, 3 and 6
        assert_eq!(run_minmax(&cfg, &word, 0xDF), Some(MinMaxResult { index: 1, value: 3 }));
        cfg.highest_index_wins = true;
        assert_eq!(run_minmax(&cfg, &word, 0xDF), Some(MinMaxResult { index: 6, value: 3 }));
        cfg.op = MinMaxOp::Max;
        assert_eq!(run_minmax(&cfg, &word, 0xFF), Some(MinMaxResult { index: 4, value: 12 }));
        assert_eq!(run_minmax(&cfg, &word, 0), None);
    }

    #[test]
    fn post_mod_saturates() {
        let cfg = MinMaxConfig {
            size: MinMaxSize::Bits8,
            post: PostMod::Increment,
            ..Default::default()
        };
        let mut word = RamWord::new();
        word.set_word(0xFF, 8, 8);
        apply_post_mod(&cfg, &mut word, 1);
        assert_eq!(word.get_word(8, 8), 0xFF);
        apply_post_mod(&cfg, &mut word, 2);
        assert_eq!(word.get_word(16, 8), 1);
        let dec = MinMaxConfig {
            post: PostMod::Decrement,
            ..cfg
        };
        apply_post_mod(&dec, &mut word, 3);
        assert_eq!(word.get_word(24, 8), 0);
    }
}
