// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ternary match.

use crate::hash::MatchInput;
use bitvector::BitVector;
use tracing::trace;

/// Width of a TCAM search word.
pub const TCAM_BITS: usize = 48;
pub type TcamWord = BitVector<TCAM_BITS>;

/// A stored ternary entry in the two-bit-per-cell `(w0, w1)` encoding:
/// `11` matches anything, `10` matches 0, `01` matches 1 and `00` never matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcamEntry {
    pub w0: TcamWord,
    pub w1: TcamWord,
}

impl TcamEntry {
    /// Entry matching `value` on the bits set in `mask`.
    #[must_use]
    pub fn from_value_mask(value: u64, mask: u64) -> Self {
        let value = TcamWord::from_u64(value);
        let mask = TcamWord::from_u64(mask);
        Self {
            w0: !(value & mask),
            w1: value | !mask,
        }
    }

    /// Does this entry match `key`?
    #[must_use]
    pub fn matches(&self, key: &TcamWord) -> bool {
        let s1 = *key;
        let s0 = !*key;
        TcamWord::tcam_compare(&self.w0, &self.w1, &s0, &s1)
    }
}

/// A TCAM: entries searched in index order, the lowest matching index wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MauTcam {
    key_bytes: Vec<usize>,
    entries: Vec<Option<TcamEntry>>,
}

impl MauTcam {
    /// A TCAM keyed on the given match input bytes (least significant first).
    #[must_use]
    pub fn new(key_bytes: Vec<usize>, depth: usize) -> Self {
        Self {
            key_bytes: key_bytes.into_iter().take(TCAM_BITS / 8).collect(),
            entries: vec![None; depth],
        }
    }

    pub fn set_entry(&mut self, index: usize, entry: Option<TcamEntry>) {
        if let Some(slot) = self.entries.get_mut(index) {
            *slot = entry;
        }
    }

    /// Search key built from the match input. Invalid bytes search as zero.
    #[must_use]
    pub fn search_key(&self, input: &MatchInput) -> TcamWord {
        let mut key = TcamWord::new();
        for (i, b) in self.key_bytes.iter().enumerate() {
            if input.valid.get_bit(*b) {
                key.set_byte(input.byte(*b), i);
            }
        }
        key
    }

    #[must_use]
    pub fn lookup(&self, input: &MatchInput) -> Option<u32> {
        let key = self.search_key(input);
        let hit = self
            .entries
            .iter()
            .position(|e| e.is_some_and(|e| e.matches(&key)));
        trace!("tcam search {key}: {hit:?}");
        hit.and_then(|i| u32::try_from(i).ok())
    }
}
