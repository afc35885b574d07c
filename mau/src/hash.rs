// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Input crossbar and Galois hash groups.

use bitvector::{BitVector, mask64};
use phv::Phv;

/// Bytes in the match input.
pub const INPUT_BYTES: usize = 128;
/// Bits in a hash group output.
pub const HASH_BITS: usize = 52;

/// Match input assembled by the input crossbar: 128 bytes with per-byte validity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MatchInput {
    pub data: BitVector<1024>,
    pub valid: BitVector<INPUT_BYTES>,
}

impl MatchInput {
    #[must_use]
    pub fn byte(&self, index: usize) -> u8 {
        self.data.get_byte(index)
    }

    /// True if every listed byte is valid.
    #[must_use]
    pub fn all_valid(&self, bytes: &[usize]) -> bool {
        bytes.iter().all(|b| self.valid.get_bit(*b))
    }
}

/// Source of one input crossbar byte: byte `byte` of PHV word `word`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct XbarByte {
    pub word: usize,
    pub byte: usize,
}

/// Input crossbar configuration: one optional source per match input byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputXbar {
    bytes: Vec<Option<XbarByte>>,
}

impl Default for InputXbar {
    fn default() -> Self {
        Self {
            bytes: vec![None; INPUT_BYTES],
        }
    }
}

impl InputXbar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route PHV word `word` byte `byte` to input byte `input`. Out of range inputs are ignored.
    pub fn set_byte(&mut self, input: usize, word: usize, byte: usize) {
        if let Some(slot) = self.bytes.get_mut(input) {
            *slot = Some(XbarByte { word, byte });
        }
    }

    /// Route all bytes of a `width`-bit PHV word to consecutive inputs starting at `input`,
    /// least significant byte first.
    pub fn set_word(&mut self, input: usize, word: usize, width: u32) {
        for b in 0..(width as usize).div_ceil(8) {
            self.set_byte(input + b, word, b);
        }
    }

    /// Build the match input for a PHV. A byte is valid if its source word is valid.
    #[must_use]
    pub fn build(&self, phv: &Phv) -> MatchInput {
        let mut input = MatchInput::default();
        for (i, src) in self.bytes.iter().enumerate() {
            if let Some(src) = src {
                if phv.is_valid(src.word) {
                    input.data.set_byte(phv.get_byte(src.word, src.byte), i);
                    input.valid.set_bit(i);
                }
            }
        }
        input
    }
}

/// A hash group: a seed and one 52-bit column per input bit.
///
/// The output is the seed XORed with the column of every set input bit, i.e. the product of
/// the input vector with a Galois (GF(2)) matrix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HashGroup {
    seed: u64,
    columns: Vec<(usize, u64)>,
}

impl HashGroup {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed: seed & mask64(HASH_BITS),
            columns: Vec::new(),
        }
    }

    /// Set the matrix column of input bit `bit`.
    pub fn set_column(&mut self, bit: usize, column: u64) {
        let column = column & mask64(HASH_BITS);
        match self.columns.iter_mut().find(|(b, _)| *b == bit) {
            Some(entry) => entry.1 = column,
            None => self.columns.push((bit, column)),
        }
    }

    /// Identity-style matrix: input bit `first_bit + i` drives hash bit `i`.
    #[must_use]
    pub fn identity(seed: u64, first_bit: usize, n_bits: usize) -> Self {
        let mut group = Self::new(seed);
        for i in 0..n_bits.min(HASH_BITS) {
            group.set_column(first_bit + i, 1 << i);
        }
        group
    }

    #[must_use]
    pub fn compute(&self, input: &MatchInput) -> u64 {
        self.columns
            .iter()
            .filter(|(bit, _)| input.data.get_bit(*bit))
            .fold(self.seed, |acc, (_, col)| acc ^ col)
    }
}
