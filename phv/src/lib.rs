// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet header vector.
//!
//! A [`Phv`] is the per-packet register file carried from the parser through the MAU stages to
//! the deparser. Words are addressed by a flat index; [`Phv::make_word_p`] converts a
//! `(group, index)` pair into that index.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate)]

use bitvector::BitVector;
use config::Chip;
use std::fmt::{Debug, Display};

/// Number of normal (matchable) words.
pub const NUM_NORMAL_WORDS: usize = 224;
/// Number of dark words present on JBay.
pub const NUM_DARK_WORDS: usize = 112;
/// Largest number of words of any layout.
pub const MAX_WORDS: usize = NUM_NORMAL_WORDS + NUM_DARK_WORDS;
/// Words per group.
pub const WORDS_PER_GROUP: usize = 32;

/// Which half of the pipeline a packet or a piece of state belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum Gress {
    #[strum(serialize = "ingress")]
    Ingress,
    #[strum(serialize = "egress")]
    Egress,
}

impl Gress {
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Gress::Ingress => 0,
            Gress::Egress => 1,
        }
    }

    /// The gress sharing the pipeline slots with this one.
    #[must_use]
    pub const fn other(self) -> Gress {
        match self {
            Gress::Ingress => Gress::Egress,
            Gress::Egress => Gress::Ingress,
        }
    }
}

/// Container class of a PHV word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WordClass {
    W8,
    W16,
    W32,
    /// JBay dark container: 32 bits, readable and writable, never matchable.
    Dark,
}

impl WordClass {
    #[must_use]
    pub const fn width(self) -> u32 {
        match self {
            WordClass::W8 => 8,
            WordClass::W16 => 16,
            WordClass::W32 | WordClass::Dark => 32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhvError {
    #[error("no PHV word {0} in this layout")]
    NoSuchWord(usize),
}

/// Word layout of a chip's PHV.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhvLayout {
    chip: Chip,
}

impl PhvLayout {
    #[must_use]
    pub const fn new(chip: Chip) -> Self {
        Self { chip }
    }

    #[must_use]
    pub const fn num_words(&self) -> usize {
        if self.chip.has_dark_phv() {
            MAX_WORDS
        } else {
            NUM_NORMAL_WORDS
        }
    }

    /// Class of word `index`, if it exists in this layout.
    #[must_use]
    pub const fn class(&self, index: usize) -> Option<WordClass> {
        if index >= self.num_words() {
            return None;
        }
        if index >= NUM_NORMAL_WORDS {
            return Some(WordClass::Dark);
        }
        Some(match index / WORDS_PER_GROUP {
            0 | 1 => WordClass::W32,
            2 | 3 => WordClass::W8,
            _ => WordClass::W16,
        })
    }

    #[must_use]
    pub const fn is_dark(&self, index: usize) -> bool {
        matches!(self.class(index), Some(WordClass::Dark))
    }

    /// Width in bits of word `index`, 0 if it does not exist.
    #[must_use]
    pub const fn width(&self, index: usize) -> u32 {
        match self.class(index) {
            Some(class) => class.width(),
            None => 0,
        }
    }
}

/// One packet's header vector.
#[derive(Clone, PartialEq, Eq)]
pub struct Phv {
    layout: PhvLayout,
    words: [u32; MAX_WORDS],
    valid: BitVector<MAX_WORDS>,
    relative_time: u64,
    version: u8,
    ghost: bool,
}

impl Phv {
    #[must_use]
    pub fn new(chip: Chip) -> Self {
        Self {
            layout: PhvLayout::new(chip),
            words: [0; MAX_WORDS],
            valid: BitVector::new(),
            relative_time: 0,
            version: 0,
            ghost: false,
        }
    }

    /// Flat word index of word `index` in group `group`.
    #[must_use]
    pub const fn make_word_p(group: usize, index: usize) -> usize {
        group * WORDS_PER_GROUP + index
    }

    #[must_use]
    pub const fn layout(&self) -> PhvLayout {
        self.layout
    }

    #[must_use]
    pub const fn num_words(&self) -> usize {
        self.layout.num_words()
    }

    /// Value of a word. Words that are invalid or do not exist read as zero.
    #[must_use]
    pub fn get(&self, index: usize) -> u32 {
        if index < self.num_words() && self.valid.get_bit(index) {
            self.words[index]
        } else {
            0
        }
    }

    /// Write a word, masking the value to the word's width and marking it valid.
    pub fn set(&mut self, index: usize, value: u32) -> Result<(), PhvError> {
        let width = self.layout.width(index);
        if width == 0 {
            return Err(PhvError::NoSuchWord(index));
        }
        self.words[index] = if width == 32 {
            value
        } else {
            value & ((1u32 << width) - 1)
        };
        self.valid.set_bit(index);
        Ok(())
    }

    /// OR `value` into a word (multiple extractors writing the same container).
    pub fn set_or(&mut self, index: usize, value: u32) -> Result<(), PhvError> {
        let old = self.get(index);
        self.set(index, old | value)
    }

    #[must_use]
    pub fn is_valid(&self, index: usize) -> bool {
        index < self.num_words() && self.valid.get_bit(index)
    }

    pub fn invalidate(&mut self, index: usize) {
        if index < self.num_words() {
            self.valid.clear_bit(index);
            self.words[index] = 0;
        }
    }

    /// Byte `byte` (0 = least significant) of word `index`.
    #[must_use]
    pub fn get_byte(&self, index: usize, byte: usize) -> u8 {
        if byte >= 4 {
            return 0;
        }
        self.get(index).to_le_bytes()[byte]
    }

    /// Iterate over `(index, value)` of every valid word.
    pub fn valid_words(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        (0..self.num_words())
            .filter(|i| self.valid.get_bit(*i))
            .map(|i| (i, self.words[i]))
    }

    #[must_use]
    pub const fn relative_time(&self) -> u64 {
        self.relative_time
    }

    pub fn set_relative_time(&mut self, t: u64) {
        self.relative_time = t;
    }

    /// 4-bit packet version.
    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    pub fn set_version(&mut self, version: u8) {
        self.version = version & 0xF;
    }

    #[must_use]
    pub const fn ghost(&self) -> bool {
        self.ghost
    }

    pub fn set_ghost(&mut self, ghost: bool) {
        self.ghost = ghost;
    }
}

impl Debug for Phv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.valid_words()).finish()
    }
}

impl Display for Phv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "PHV (version {}, time {}):", self.version, self.relative_time)?;
        for (index, value) in self.valid_words() {
            let g = index / WORDS_PER_GROUP;
            let i = index % WORDS_PER_GROUP;
            writeln!(f, "  [{g:2}.{i:2}] {value:#010x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tofino_layout() {
        let layout = PhvLayout::new(Chip::Tofino);
        assert_eq!(layout.num_words(), 224);
        assert_eq!(layout.class(0), Some(WordClass::W32));
        assert_eq!(layout.class(Phv::make_word_p(2, 5)), Some(WordClass::W8));
        assert_eq!(layout.class(Phv::make_word_p(4, 7)), Some(WordClass::W16));
        assert_eq!(layout.class(Phv::make_word_p(6, 31)), Some(WordClass::W16));
        assert_eq!(layout.class(224), None);
    }

    #[test]
    fn gresses_pair_up() {
        assert_eq!(Gress::Ingress.other(), Gress::Egress);
        assert_eq!(Gress::Egress.other().index(), Gress::Ingress.index());
    }

    #[test]
    fn jbay_has_dark_words() {
        let layout = PhvLayout::new(Chip::JBay);
        assert_eq!(layout.num_words(), 336);
        assert!(layout.is_dark(224));
        assert!(layout.is_dark(335));
        assert!(!layout.is_dark(223));
        assert_eq!(layout.width(300), 32);
    }

    #[test]
    fn writes_mask_to_width_and_mark_valid() {
        let mut phv = Phv::new(Chip::Tofino);
        let w8 = Phv::make_word_p(2, 0);
        let w16 = Phv::make_word_p(4, 7);
        assert!(!phv.is_valid(w16));
        phv.set(w8, 0x1234).expect("word exists");
        phv.set(w16, 0xABCD_1188).expect("word exists");
        assert_eq!(phv.get(w8), 0x34);
        assert_eq!(phv.get(w16), 0x1188);
        assert!(phv.is_valid(w16));
        assert_eq!(phv.get_byte(w16, 1), 0x11);
        assert_eq!(phv.set(224, 1), Err(PhvError::NoSuchWord(224)));
        phv.invalidate(w16);
        assert_eq!(phv.get(w16), 0);
        assert_eq!(phv.valid_words().count(), 1);
    }

    #[test]
    fn version_is_four_bits() {
        let mut phv = Phv::new(Chip::JBay);
        phv.set_version(0x1F);
        assert_eq!(phv.version(), 0xF);
    }

    #[test]
    fn any_write_reads_back_masked() {
        bolero::check!()
            .with_type::<(u16, u32)>()
            .cloned()
            .for_each(|(index, value)| {
                let mut phv = Phv::new(Chip::JBay);
                let index = usize::from(index) % MAX_WORDS;
                phv.set(index, value).expect("word exists");
                let width = phv.layout().width(index);
                let mask = if width == 32 { u32::MAX } else { (1 << width) - 1 };
                assert_eq!(phv.get(index), value & mask);
            });
    }
}
