// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Fixed width bit vectors.
//!
//! [`BitVector`] is the value type used all over the model to represent register contents,
//! RAM words, hash outputs and PHV slices. It is `Copy`: words are stored inline and bits at or
//! above the configured width are always zero, so equality and hashing never observe stale bits.

#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation
)]

use std::fmt::{Debug, Display};
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign, Not};
use std::str::FromStr;

/// Widest [`BitVector`] supported.
pub const MAX_BITS: usize = 1024;
const MAX_WORDS: usize = MAX_BITS / 64;

/// Mask with the low `n` bits set (`n` may be 64).
#[inline]
#[must_use]
pub const fn mask64(n: usize) -> u64 {
    if n >= 64 { u64::MAX } else { (1u64 << n) - 1 }
}

/// Errors that can occur when parsing a [`BitVector`] from a hex string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseBitVectorError {
    #[error("invalid hex digit '{0}'")]
    InvalidDigit(char),
    #[error("value does not fit in {0} bits")]
    TooWide(usize),
    #[error("empty string")]
    Empty,
}

/// A string of `N` bits stored as little-endian 64-bit words.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct BitVector<const N: usize> {
    words: [u64; MAX_WORDS],
}

impl<const N: usize> Default for BitVector<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> BitVector<N> {
    const VALID_WIDTH: () = assert!(N > 0 && N <= MAX_BITS, "unsupported BitVector width");

    /// Number of 64-bit words backing this vector.
    pub const WORDS: usize = N.div_ceil(64);

    const fn last_word_mask() -> u64 {
        let rem = N % 64;
        if rem == 0 { u64::MAX } else { (1u64 << rem) - 1 }
    }

    #[inline]
    fn mask_last_word(&mut self) {
        self.words[Self::WORDS - 1] &= Self::last_word_mask();
    }

    /// An all-zeros vector.
    #[must_use]
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_WIDTH;
        Self {
            words: [0; MAX_WORDS],
        }
    }

    /// An all-ones vector.
    #[must_use]
    pub fn ones() -> Self {
        let mut bv = Self::new();
        bv.fill_all_ones();
        bv
    }

    /// Build from words, least significant first. Extra words and bits are dropped.
    #[must_use]
    pub fn from_words(words: &[u64]) -> Self {
        let mut bv = Self::new();
        for (dst, src) in bv.words.iter_mut().take(Self::WORDS).zip(words) {
            *dst = *src;
        }
        bv.mask_last_word();
        bv
    }

    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self::from_words(&[value])
    }

    #[must_use]
    pub fn from_u128(value: u128) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        Self::from_words(&[value as u64, (value >> 64) as u64])
    }

    /// Width in bits.
    #[must_use]
    pub const fn width(&self) -> usize {
        N
    }

    /// The backing words, least significant first.
    #[must_use]
    pub fn words(&self) -> &[u64] {
        &self.words[..Self::WORDS]
    }

    /// The low 128 bits.
    #[must_use]
    pub fn to_u128(&self) -> u128 {
        let lo = u128::from(self.words[0]);
        let hi = if Self::WORDS > 1 {
            u128::from(self.words[1])
        } else {
            0
        };
        lo | (hi << 64)
    }

    #[must_use]
    pub fn get_bit(&self, bit: usize) -> bool {
        if bit >= N {
            return false;
        }
        (self.words[bit / 64] >> (bit % 64)) & 1 == 1
    }

    pub fn set_bit_to(&mut self, bit: usize, value: bool) {
        if bit >= N {
            return;
        }
        let m = 1u64 << (bit % 64);
        if value {
            self.words[bit / 64] |= m;
        } else {
            self.words[bit / 64] &= !m;
        }
    }

    pub fn set_bit(&mut self, bit: usize) {
        self.set_bit_to(bit, true);
    }

    pub fn clear_bit(&mut self, bit: usize) {
        self.set_bit_to(bit, false);
    }

    /// Read `n_bits` (at most 64) starting at `offset`. Bits beyond the width read as zero.
    #[must_use]
    pub fn get_word(&self, offset: usize, n_bits: usize) -> u64 {
        if n_bits == 0 || offset >= N {
            return 0;
        }
        let n = n_bits.min(64).min(N - offset);
        let wi = offset / 64;
        let bi = offset % 64;
        let mut value = self.words[wi] >> bi;
        if bi != 0 && wi + 1 < Self::WORDS {
            value |= self.words[wi + 1] << (64 - bi);
        }
        value & mask64(n)
    }

    /// Write the low `n_bits` (at most 64) of `value` at `offset`. Out of range bits are dropped.
    pub fn set_word(&mut self, value: u64, offset: usize, n_bits: usize) {
        if n_bits == 0 || offset >= N {
            return;
        }
        let n = n_bits.min(64).min(N - offset);
        let m = mask64(n);
        let value = value & m;
        let wi = offset / 64;
        let bi = offset % 64;
        self.words[wi] = (self.words[wi] & !(m << bi)) | (value << bi);
        if bi + n > 64 && wi + 1 < Self::WORDS {
            let spill = bi + n - 64;
            let hi_mask = mask64(spill);
            self.words[wi + 1] = (self.words[wi + 1] & !hi_mask) | (value >> (64 - bi));
        }
        self.mask_last_word();
    }

    #[must_use]
    pub fn get_byte(&self, byte: usize) -> u8 {
        #[allow(clippy::cast_possible_truncation)]
        let b = self.get_word(byte * 8, 8) as u8;
        b
    }

    pub fn set_byte(&mut self, value: u8, byte: usize) {
        self.set_word(u64::from(value), byte * 8, 8);
    }

    pub fn fill_all_zeros(&mut self) {
        self.words = [0; MAX_WORDS];
    }

    pub fn fill_all_ones(&mut self) {
        for w in self.words.iter_mut().take(Self::WORDS) {
            *w = u64::MAX;
        }
        self.mask_last_word();
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.words().iter().all(|w| *w == 0)
    }

    #[must_use]
    pub fn is_all_ones(&self) -> bool {
        *self == Self::ones()
    }

    #[must_use]
    pub fn popcount(&self) -> u32 {
        self.words().iter().map(|w| w.count_ones()).sum()
    }

    /// Even parity bit: true when the number of set bits is odd.
    #[must_use]
    pub fn parity(&self) -> bool {
        self.popcount() % 2 == 1
    }

    /// Lowest set bit at or above `start`.
    #[must_use]
    pub fn first_set_from(&self, start: usize) -> Option<usize> {
        if start >= N {
            return None;
        }
        let mut wi = start / 64;
        let mut word = self.words[wi] & !mask64(start % 64);
        loop {
            if word != 0 {
                return Some(wi * 64 + word.trailing_zeros() as usize);
            }
            wi += 1;
            if wi >= Self::WORDS {
                return None;
            }
            word = self.words[wi];
        }
    }

    /// Highest set bit at or below `limit`.
    #[must_use]
    pub fn last_set_at_or_below(&self, limit: usize) -> Option<usize> {
        let limit = limit.min(N - 1);
        let mut wi = limit / 64;
        let mut word = self.words[wi] & mask64(limit % 64 + 1);
        loop {
            if word != 0 {
                return Some(wi * 64 + 63 - word.leading_zeros() as usize);
            }
            if wi == 0 {
                return None;
            }
            wi -= 1;
            word = self.words[wi];
        }
    }

    #[must_use]
    pub fn get_first_bit_set(&self) -> Option<usize> {
        self.first_set_from(0)
    }

    #[must_use]
    pub fn get_last_bit_set(&self) -> Option<usize> {
        self.last_set_at_or_below(N - 1)
    }

    pub fn shift_left(&mut self, n: usize) {
        if n >= N {
            self.fill_all_zeros();
            return;
        }
        let ws = n / 64;
        let bs = n % 64;
        for i in (0..Self::WORDS).rev() {
            let value = if i >= ws {
                let src = i - ws;
                let mut v = self.words[src] << bs;
                if bs != 0 && src >= 1 {
                    v |= self.words[src - 1] >> (64 - bs);
                }
                v
            } else {
                0
            };
            self.words[i] = value;
        }
        self.mask_last_word();
    }

    pub fn shift_right(&mut self, n: usize) {
        if n >= N {
            self.fill_all_zeros();
            return;
        }
        let ws = n / 64;
        let bs = n % 64;
        for i in 0..Self::WORDS {
            let src = i + ws;
            let value = if src < Self::WORDS {
                let mut v = self.words[src] >> bs;
                if bs != 0 && src + 1 < Self::WORDS {
                    v |= self.words[src + 1] << (64 - bs);
                }
                v
            } else {
                0
            };
            self.words[i] = value;
        }
    }

    pub fn byte_shift_left(&mut self, bytes: usize) {
        self.shift_left(bytes * 8);
    }

    pub fn byte_shift_right(&mut self, bytes: usize) {
        self.shift_right(bytes * 8);
    }

    /// Copy `M` bits starting at `offset` into a new vector.
    #[must_use]
    pub fn extract_into<const M: usize>(&self, offset: usize) -> BitVector<M> {
        let mut out = BitVector::<M>::new();
        let mut done = 0;
        while done < M {
            let n = (M - done).min(64);
            out.set_word(self.get_word(offset + done, n), done, n);
            done += n;
        }
        out
    }

    /// Overwrite the bits starting at `offset` with all `M` bits of `src`.
    pub fn set_from<const M: usize>(&mut self, offset: usize, src: &BitVector<M>) {
        let mut done = 0;
        while done < M {
            let n = (M - done).min(64);
            self.set_word(src.get_word(done, n), offset + done, n);
            done += n;
        }
    }

    #[must_use]
    pub fn masked_equals(&self, other: &Self, mask: &Self) -> bool {
        ((*self ^ *other) & *mask).is_zero()
    }

    /// Asymmetric compare of `self` (stored) against `query`.
    ///
    /// A bit mismatches when stored=0/query=1 and `s0q1` is set, or stored=1/query=0 and
    /// `s1q0` is set.
    #[must_use]
    pub fn masked_s0q1_s1q0_equals(&self, query: &Self, s0q1: &Self, s1q0: &Self) -> bool {
        let s0q1_miss = !*self & *query & *s0q1;
        let s1q0_miss = *self & !*query & *s1q0;
        (s0q1_miss | s1q0_miss).is_zero()
    }

    /// TCAM compare of a stored `(w0, w1)` entry against a search key `(s0, s1)`.
    ///
    /// A cell matches unless `(!w0 & s0) | (!w1 & s1)` is set for it.
    #[must_use]
    pub fn tcam_compare(w0: &Self, w1: &Self, s0: &Self, s1: &Self) -> bool {
        ((!*w0 & *s0) | (!*w1 & *s1)).is_zero()
    }
}

impl<const N: usize> BitAnd for BitVector<N> {
    type Output = Self;
    fn bitand(mut self, rhs: Self) -> Self {
        self &= rhs;
        self
    }
}

impl<const N: usize> BitAndAssign for BitVector<N> {
    fn bitand_assign(&mut self, rhs: Self) {
        for (a, b) in self.words.iter_mut().zip(rhs.words) {
            *a &= b;
        }
    }
}

impl<const N: usize> BitOr for BitVector<N> {
    type Output = Self;
    fn bitor(mut self, rhs: Self) -> Self {
        self |= rhs;
        self
    }
}

impl<const N: usize> BitOrAssign for BitVector<N> {
    fn bitor_assign(&mut self, rhs: Self) {
        for (a, b) in self.words.iter_mut().zip(rhs.words) {
            *a |= b;
        }
    }
}

impl<const N: usize> BitXor for BitVector<N> {
    type Output = Self;
    fn bitxor(mut self, rhs: Self) -> Self {
        self ^= rhs;
        self
    }
}

impl<const N: usize> BitXorAssign for BitVector<N> {
    fn bitxor_assign(&mut self, rhs: Self) {
        for (a, b) in self.words.iter_mut().zip(rhs.words) {
            *a ^= b;
        }
    }
}

impl<const N: usize> Not for BitVector<N> {
    type Output = Self;
    fn not(mut self) -> Self {
        for w in self.words.iter_mut().take(Self::WORDS) {
            *w = !*w;
        }
        self.mask_last_word();
        self
    }
}

impl<const N: usize> From<u64> for BitVector<N> {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl<const N: usize> FromStr for BitVector<N> {
    type Err = ParseBitVectorError;

    /// Parse a hex string, with or without a `0x` prefix. `_` separators are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.is_empty() {
            return Err(ParseBitVectorError::Empty);
        }
        let mut bv = Self::new();
        let mut bit = 0;
        for c in digits.chars().rev().filter(|c| *c != '_') {
            let nibble = c.to_digit(16).ok_or(ParseBitVectorError::InvalidDigit(c))?;
            if nibble != 0 && bit + (32 - nibble.leading_zeros() as usize) > N {
                return Err(ParseBitVectorError::TooWide(N));
            }
            bv.set_word(u64::from(nibble), bit, 4);
            bit += 4;
        }
        Ok(bv)
    }
}

impl<const N: usize> Display for BitVector<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x")?;
        let mut words = self.words().iter().rev();
        if let Some(first) = words.next() {
            write!(f, "{first:x}")?;
        }
        for w in words {
            write!(f, "_{w:016x}")?;
        }
        Ok(())
    }
}

impl<const N: usize> Debug for BitVector<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BitVector<{N}>({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn reference_get(words: [u64; 2], offset: usize, n: usize, width: usize) -> u64 {
        let full = u128::from(words[0]) | (u128::from(words[1]) << 64);
        let full = if width >= 128 {
            full
        } else {
            full & ((1u128 << width) - 1)
        };
        if offset >= width {
            return 0;
        }
        let n = n.min(64).min(width - offset);
        #[allow(clippy::cast_possible_truncation)]
        let v = (full >> offset) as u64;
        v & mask64(n)
    }

    #[test]
    fn top_bits_are_masked() {
        let bv = BitVector::<70>::from_words(&[u64::MAX, u64::MAX]);
        assert_eq!(bv.words()[1], 0x3f);
        assert_eq!(bv.popcount(), 70);
        let inverted = !BitVector::<70>::new();
        assert_eq!(inverted, bv);
        assert!(inverted.is_all_ones());
    }

    #[test]
    fn get_set_word_spanning_two_words() {
        let mut bv = BitVector::<128>::new();
        bv.set_word(0xdead_beef_cafe, 40, 48);
        assert_eq!(bv.get_word(40, 48), 0xdead_beef_cafe);
        assert_eq!(bv.get_word(64, 24), 0xdead_be);
        assert_eq!(bv.get_word(40, 24), 0xef_cafe);
        // out of range
        assert_eq!(bv.get_word(128, 8), 0);
        bv.set_word(0xff, 200, 8);
        assert_eq!(bv.popcount(), (0xdead_beef_cafe_u64).count_ones());
    }

    #[test]
    fn set_word_truncates_at_width() {
        let mut bv = BitVector::<52>::new();
        bv.set_word(u64::MAX, 48, 16);
        assert_eq!(bv.get_word(48, 16), 0xf);
        assert_eq!(bv.words()[0], 0xf << 48);
    }

    #[test]
    fn get_word_matches_reference() {
        bolero::check!()
            .with_type::<(u64, u64, u8, u8)>()
            .cloned()
            .for_each(|(w0, w1, offset, n)| {
                let bv = BitVector::<100>::from_words(&[w0, w1]);
                let offset = usize::from(offset % 128);
                let n = usize::from(n % 65);
                assert_eq!(
                    bv.get_word(offset, n),
                    reference_get([w0, w1], offset, n, 100)
                );
            });
    }

    #[test]
    fn round_trip_every_offset() {
        let words = [0x0123_4567_89ab_cdef_u64, 0xfedc_ba98_7654_3210_u64];
        let bv = BitVector::<128>::from_words(&words);
        let source = u128::from(words[0]) | (u128::from(words[1]) << 64);
        for offset in 0..128 {
            for n in [1, 7, 33, 64] {
                let n_valid = n.min(128 - offset);
                #[allow(clippy::cast_possible_truncation)]
                let expected = ((source >> offset) as u64) & mask64(n_valid);
                assert_eq!(bv.get_word(offset, n), expected, "offset {offset} n {n}");
            }
        }
        let mut rebuilt = BitVector::<128>::new();
        for offset in (0..128).step_by(13) {
            let n = 13.min(128 - offset);
            rebuilt.set_word(bv.get_word(offset, n), offset, n);
        }
        assert_eq!(rebuilt, bv);
    }

    #[test]
    fn tcam_compare_per_bit() {
        bolero::check!()
            .with_type::<(u64, u64, u64, u64)>()
            .cloned()
            .for_each(|(w0, w1, s0, s1)| {
                let bv = |v| BitVector::<64>::from_u64(v);
                let mut expected = true;
                for bit in 0..64 {
                    let b = |v: u64| (v >> bit) & 1 == 1;
                    if (!b(w0) && b(s0)) || (!b(w1) && b(s1)) {
                        expected = false;
                    }
                }
                assert_eq!(
                    BitVector::tcam_compare(&bv(w0), &bv(w1), &bv(s0), &bv(s1)),
                    expected
                );
            });
    }

    #[test]
    fn tcam_encodings() {
        let one = BitVector::<1>::from_u64(1);
        let zero = BitVector::<1>::new();
        // search for 1 is (s0=0, s1=1), search for 0 is (s0=1, s1=0)
        let search = |v: bool| if v { (zero, one) } else { (one, zero) };
        // don't care (11) matches both
        for v in [false, true] {
            let (s0, s1) = search(v);
            assert!(BitVector::tcam_compare(&one, &one, &s0, &s1));
            // 00 never matches
            assert!(!BitVector::tcam_compare(&zero, &zero, &s0, &s1));
        }
        // w0=1,w1=0 matches only 0
        let (s0, s1) = search(false);
        assert!(BitVector::tcam_compare(&one, &zero, &s0, &s1));
        let (s0, s1) = search(true);
        assert!(!BitVector::tcam_compare(&one, &zero, &s0, &s1));
    }

    #[test]
    fn s0q1_s1q0_compare() {
        let stored = BitVector::<8>::from_u64(0b1010);
        let query = BitVector::<8>::from_u64(0b0110);
        let none = BitVector::<8>::new();
        let all = BitVector::<8>::ones();
        // bit 2: stored 0, query 1; bit 3: stored 1, query 0
        assert!(!stored.masked_s0q1_s1q0_equals(&query, &all, &all));
        assert!(!stored.masked_s0q1_s1q0_equals(&query, &all, &none));
        assert!(stored.masked_s0q1_s1q0_equals(&query, &none, &none));
        let only_bit3 = BitVector::<8>::from_u64(0b1000);
        assert!(stored.masked_s0q1_s1q0_equals(&query, &none, &BitVector::from_u64(0b0100)));
        assert!(!stored.masked_s0q1_s1q0_equals(&query, &none, &only_bit3));
    }

    #[test]
    fn shifts_and_extraction() {
        let mut bv = BitVector::<128>::from_u64(0xabcd);
        bv.shift_left(60);
        assert_eq!(bv.get_word(60, 16), 0xabcd);
        bv.byte_shift_right(7);
        assert_eq!(bv.get_word(4, 16), 0xabcd);
        let small: BitVector<12> = bv.extract_into(8);
        assert_eq!(small.get_word(0, 12), 0xabc);
        let mut big = BitVector::<256>::new();
        big.set_from(190, &bv);
        assert_eq!(big.get_word(194, 16), 0xabcd);
        assert_eq!(big.get_first_bit_set(), Some(194));
        assert_eq!(big.get_last_bit_set(), Some(209));
        assert_eq!(big.last_set_at_or_below(200), Some(200));
        assert_eq!(big.first_set_from(210), None);
    }

    #[test]
    fn parity_and_hex() {
        let bv: BitVector<72> = "0x80_0000_0000_0000_0001".parse().unwrap();
        assert_eq!(bv.get_byte(8), 0x80);
        assert!(!bv.parity());
        assert_eq!(bv.to_string(), "0x80_0000000000000001");
        assert_eq!(
            "0x1ff".parse::<BitVector<8>>(),
            Err(ParseBitVectorError::TooWide(8))
        );
        assert_eq!(
            "0xfg".parse::<BitVector<8>>(),
            Err(ParseBitVectorError::InvalidDigit('g'))
        );
    }
}
