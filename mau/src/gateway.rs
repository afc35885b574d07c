// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Gateway tables: small predicate tables deciding whether a logical table runs.

use crate::hash::MatchInput;
use bitvector::BitVector;

pub type GatewayWord = BitVector<64>;

/// Outcome of a gateway lookup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GatewayResult {
    /// Suppress the logical table's own lookup.
    pub inhibit: bool,
    /// Next table override.
    pub next_table: Option<u16>,
}

/// One gateway row. The row matches unless some bit has stored 0 / query 1 with `s0q1` set,
/// or stored 1 / query 0 with `s1q0` set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GatewayRow {
    pub value: GatewayWord,
    pub s0q1: GatewayWord,
    pub s1q0: GatewayWord,
    pub result: GatewayResult,
}

impl GatewayRow {
    /// Row matching exactly `value` on the bits in `mask`.
    #[must_use]
    pub fn exact(value: u64, mask: u64, result: GatewayResult) -> Self {
        let mask = GatewayWord::from_u64(mask);
        Self {
            value: GatewayWord::from_u64(value),
            s0q1: mask,
            s1q0: mask,
            result,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GatewayTable {
    pub key_bytes: Vec<usize>,
    pub rows: Vec<GatewayRow>,
    pub miss: GatewayResult,
}

impl GatewayTable {
    #[must_use]
    pub fn search_word(&self, input: &MatchInput) -> GatewayWord {
        let mut word = GatewayWord::new();
        for (i, b) in self.key_bytes.iter().take(8).enumerate() {
            if input.valid.get_bit(*b) {
                word.set_byte(input.byte(*b), i);
            }
        }
        word
    }

    /// First matching row's result, else the miss result.
    #[must_use]
    pub fn lookup(&self, input: &MatchInput) -> GatewayResult {
        let query = self.search_word(input);
        self.rows
            .iter()
            .find(|row| row.value.masked_s0q1_s1q0_equals(&query, &row.s0q1, &row.s1q0))
            .map_or(self.miss, |row| row.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn first_matching_row_wins() {
        let hit = GatewayResult {
            inhibit: false,
            next_table: Some(0x21),
        };
        let any = GatewayResult {
            inhibit: true,
            next_table: None,
        };
        let table = GatewayTable {
            key_bytes: vec![4],
            rows: vec![
                GatewayRow::exact(0x06, 0xFF, hit),
                GatewayRow::exact(0, 0, any),
            ],
            miss: GatewayResult::default(),
        };
        let mut input = MatchInput::default();
        input.data.set_byte(0x06, 4);
        input.valid.set_bit(4);
        assert_eq!(table.lookup(&input), hit);
        input.data.set_byte(0x11, 4);
        assert_eq!(table.lookup(&input), any);
    }

    #[test]
    fn asymmetric_masks() {
        // only flag query bits set where the stored value is zero
        let row = GatewayRow {
            value: GatewayWord::from_u64(0b1100),
            s0q1: GatewayWord::from_u64(0b1111),
            s1q0: GatewayWord::new(),
            result: GatewayResult::default(),
        };
        let table = GatewayTable {
            key_bytes: vec![0],
            rows: vec![row],
            miss: GatewayResult {
                inhibit: true,
                next_table: None,
            },
        };
        let mut input = MatchInput::default();
        input.valid.set_bit(0);
        input.data.set_byte(0b0100, 0);
        assert!(!table.lookup(&input).inhibit);
        input.data.set_byte(0b0101, 0);
        assert!(table.lookup(&input).inhibit);
    }
}
