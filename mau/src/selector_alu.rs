// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Selector ALU: picks a live member of a group from a hash.
//!
//! The selector RAM word holds the live member bitmap in bits `[0, 120)` and the number of
//! live members recorded by the control plane in bits `[120, 127)`.

use crate::address::MeterAddr;
use crate::error::{MauError, relaxable};
use crate::sram::RamWord;
use tracing::trace;

pub const MAX_MEMBERS: usize = 120;
const LIVE_COUNT_OFFSET: usize = 120;
const LIVE_COUNT_WIDTH: usize = 7;
const BUCKET_BITS: u32 = 14;
const BUCKET_MASK: u64 = (1 << BUCKET_BITS) - 1;
/// No member selected.
pub const NO_SELECTION: u8 = 0xFF;

const SBOX: [u64; 16] = [
    0xC, 0x5, 0x6, 0xB, 0x9, 0x0, 0xA, 0xD, 0x3, 0xE, 0xF, 0x8, 0x4, 0x7, 0x1, 0x2,
];

/// Scramble a 52-bit hash one nibble at a time through a 4-bit S-box.
#[must_use]
pub fn scramble(hash: u64) -> u64 {
    (0..13).fold(0, |acc, n| {
        let nibble = (hash >> (4 * n)) & 0xF;
        acc | (SBOX[nibble as usize] << (4 * n))
    })
}

const fn rev6(v: usize) -> usize {
    let mut out = 0;
    let mut i = 0;
    while i < 6 {
        if v & (1 << i) != 0 {
            out |= 1 << (5 - i);
        }
        i += 1;
    }
    out
}

/// One past the highest set member bit, 0 for an empty group.
#[must_use]
pub fn s_word_msb(s_word: &RamWord) -> usize {
    members(s_word).get_last_bit_set().map_or(0, |b| b + 1)
}

fn members(s_word: &RamWord) -> RamWord {
    let mut live = *s_word;
    live.set_word(0, MAX_MEMBERS, 128 - MAX_MEMBERS);
    live
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectorAluConfig {
    /// Resilient (with plan B fallback) rather than fair hashing.
    pub resilient: bool,
    /// Scramble the hash through the S-box first.
    pub scramble: bool,
    /// Which of the three resilient buckets may be tried, bit 0 first.
    pub hash_enable: u8,
    /// Bucket used by fair hashing.
    pub fair_hash_sel: u8,
}

#[derive(Clone, Copy, Debug)]
struct LastRun {
    addr: u32,
    time: u64,
    input: RamWord,
}

/// Result of one selector run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectorOutput {
    /// Selected member, [`NO_SELECTION`] if the group is empty.
    pub index: u8,
    /// Member word the selection was made from.
    pub word: RamWord,
}

#[derive(Debug)]
pub struct MauSelectorAlu {
    alu: usize,
    config: SelectorAluConfig,
    relax_selector_check: bool,
    last: Option<LastRun>,
}

impl MauSelectorAlu {
    #[must_use]
    pub fn new(alu: usize, config: SelectorAluConfig, relax_selector_check: bool) -> Self {
        Self {
            alu,
            config,
            relax_selector_check,
            last: None,
        }
    }

    pub fn set_config(&mut self, config: SelectorAluConfig) {
        self.config = config;
    }

    fn hash(&self, hash52: u64) -> u64 {
        if self.config.scramble {
            scramble(hash52)
        } else {
            hash52
        }
    }

    /// Try the enabled resilient buckets in priority order. Returns the first one that lands
    /// on a live member, or [`NO_SELECTION`].
    #[must_use]
    pub fn get_resilient_selection_index(&self, hash52: u64, s_word: &RamWord) -> u8 {
        let msb = s_word_msb(s_word);
        if msb == 0 {
            return NO_SELECTION;
        }
        let h = self.hash(hash52);
        for i in 0..3 {
            if self.config.hash_enable & (1 << i) == 0 {
                continue;
            }
            let bucket = ((h >> (BUCKET_BITS * i)) & BUCKET_MASK) as usize;
            let index = bucket % msb;
            if s_word.get_bit(index) {
                return index as u8;
            }
        }
        NO_SELECTION
    }

    /// Plan B: permute the member bitmap with an 18-bit hash and circularly priority encode
    /// from a hash-selected head. Always finds a member if there is one.
    #[must_use]
    pub fn get_planb_resilient_selection_index(&self, hash52: u64, s_word: &RamWord) -> u8 {
        let h18 = (scramble(hash52) >> 34) & 0x3FFFF;
        let even_key = (h18 & 0x3F) as usize;
        let odd_key = ((h18 >> 6) & 0x3F) as usize;
        let head = ((h18 >> 11) & 0x7F) as usize;
        let permute = |p: usize| {
            let k = p >> 1;
            if p & 1 == 0 {
                2 * (k ^ even_key)
            } else {
                2 * (rev6(k) ^ odd_key) + 1
            }
        };
        let unpermute = |q: usize| {
            let m = q >> 1;
            if q & 1 == 0 {
                2 * (m ^ even_key)
            } else {
                2 * rev6(m ^ odd_key) + 1
            }
        };
        let live = members(s_word);
        let mut permuted = RamWord::new();
        for p in 0..MAX_MEMBERS {
            if live.get_bit(p) {
                permuted.set_bit(permute(p));
            }
        }
        let Some(q) = permuted
            .last_set_at_or_below(head)
            .or_else(|| permuted.get_last_bit_set())
        else {
            return NO_SELECTION;
        };
        let index = unpermute(q);
        trace!(alu = self.alu, head, "plan B selected {index} (permuted {q})");
        index as u8
    }

    /// Fair hashing: the chosen bucket indexes the list of live members.
    pub fn get_fair_selection_index(&self, hash52: u64, s_word: &RamWord) -> Result<u8, MauError> {
        let live = members(s_word);
        let positions: Vec<usize> = (0..MAX_MEMBERS).filter(|b| live.get_bit(*b)).collect();
        let counted = live.popcount();
        let recorded = s_word.get_word(LIVE_COUNT_OFFSET, LIVE_COUNT_WIDTH) as u32;
        if counted != recorded {
            relaxable(
                self.relax_selector_check,
                MauError::SelectorLiveMismatch {
                    alu: self.alu,
                    counted,
                    expected: recorded,
                },
            )?;
        }
        if positions.is_empty() {
            return Ok(NO_SELECTION);
        }
        let sel = u32::from(self.config.fair_hash_sel.min(2));
        let bucket = ((self.hash(hash52) >> (BUCKET_BITS * sel)) & BUCKET_MASK) as usize;
        Ok(positions[bucket % positions.len()] as u8)
    }

    /// Run the selector on the word at `addr` read from RAM as `ram_word`.
    ///
    /// A read of the same word on the cycle right after the previous one sees the previous
    /// cycle's input, not RAM.
    pub fn run_alu_with_state(
        &mut self,
        addr: MeterAddr,
        time: u64,
        ram_word: RamWord,
        hash52: u64,
    ) -> Result<SelectorOutput, MauError> {
        let word = match self.last {
            Some(last) if last.addr == addr.word() && time == last.time.wrapping_add(1) => {
                trace!(alu = self.alu, "forwarding hazard on word {:#x}", last.addr);
                last.input
            }
            _ => ram_word,
        };
        self.last = Some(LastRun {
            addr: addr.word(),
            time,
            input: word,
        });
        let index = if self.config.resilient {
            match self.get_resilient_selection_index(hash52, &word) {
                NO_SELECTION => self.get_planb_resilient_selection_index(hash52, &word),
                index => index,
            }
        } else {
            self.get_fair_selection_index(hash52, &word)?
        };
        Ok(SelectorOutput { index, word })
    }
}

/// Build a selector word from a member list, recording the live count.
#[must_use]
pub fn selector_word(live_members: &[usize]) -> RamWord {
    let mut word = RamWord::new();
    let mut count = 0u64;
    for m in live_members.iter().filter(|m| **m < MAX_MEMBERS) {
        if !word.get_bit(*m) {
            word.set_bit(*m);
            count += 1;
        }
    }
    word.set_word(count, LIVE_COUNT_OFFSET, LIVE_COUNT_WIDTH);
    word
}
