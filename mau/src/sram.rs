// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Sparse 128-bit wide RAM.

use bitvector::BitVector;
use hashbrown::HashMap;

pub type RamWord = BitVector<128>;

/// A RAM of 128-bit words addressed by VPN and index. Unwritten words read as zero.
#[derive(Clone, Debug, Default)]
pub struct MauSram {
    words: HashMap<u32, RamWord>,
}

impl MauSram {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn read(&self, addr: u32) -> RamWord {
        self.words.get(&addr).copied().unwrap_or_default()
    }

    pub fn write(&mut self, addr: u32, word: RamWord) {
        if word.is_zero() {
            self.words.remove(&addr);
        } else {
            self.words.insert(addr, word);
        }
    }

    /// Read-modify-write of a field of a word.
    pub fn write_field(&mut self, addr: u32, value: u64, offset: usize, n_bits: usize) {
        let mut word = self.read(addr);
        word.set_word(value, offset, n_bits);
        self.write(addr, word);
    }

    /// Addresses of non-zero words, in no particular order.
    pub fn occupied(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.keys().copied()
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_read_write() {
        let mut ram = MauSram::new();
        assert!(ram.read(7).is_zero());
        ram.write_field(7, 0xABC, 60, 12);
        assert_eq!(ram.read(7).get_word(60, 12), 0xABC);
        assert_eq!(ram.occupied().count(), 1);
        ram.write(7, RamWord::new());
        assert_eq!(ram.occupied().count(), 0);
    }
}
