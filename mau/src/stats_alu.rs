// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet and byte counting ALU.
//!
//! A stats RAM word holds up to six entries. Entries are packed from bit 0 upwards; inside an
//! entry the byte count occupies the low bits with the packet count above it. Formats marked
//! `ones_rsvd` reserve the all-ones value: counters saturate there, and an entry whose counters
//! are all at all-ones is frozen.

use crate::address::{StatsAddr, StatsOp};
use crate::error::MauError;
use crate::sram::{MauSram, RamWord};
use bitvector::mask64;
use hashbrown::HashMap;
use tracing::{debug, trace};

/// Layout of one entry of a stats format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatsFormatInfo {
    pub pkt_width: usize,
    pub pkt_offset: usize,
    pub byte_width: usize,
    pub byte_offset: usize,
    pub ones_rsvd: bool,
}

// (pkt bits, byte bits, ones reserved), indexed by (pkt << 4) | (byte << 3) | n_entries
const fn format_entry(index: usize) -> Option<(usize, usize, bool)> {
    match index {
        0x19 => Some((64, 64, false)),
        0x1A => Some((28, 36, false)),
        0x1B => Some((17, 25, true)),
        0x12 => Some((64, 0, false)),
        0x13 => Some((42, 0, true)),
        0x14 => Some((32, 0, false)),
        0x16 => Some((21, 0, true)),
        0x09 => Some((0, 64, false)),
        0x0A => Some((0, 64, false)),
        0x0B => Some((0, 42, true)),
        0x0C => Some((0, 32, false)),
        _ => None,
    }
}

/// Layout of entry `subword` in the format `(pkt, byte, n_entries)`, if the format and
/// subword are valid.
#[must_use]
pub fn get_stats_format_info(
    pkt: bool,
    byte: bool,
    n_entries: u8,
    subword: u8,
) -> Option<StatsFormatInfo> {
    if n_entries == 0 || subword >= n_entries || n_entries > 7 {
        return None;
    }
    let index = (usize::from(pkt) << 4) | (usize::from(byte) << 3) | usize::from(n_entries);
    let (pkt_width, byte_width, ones_rsvd) = format_entry(index)?;
    let entry_width = pkt_width + byte_width;
    let base = entry_width * usize::from(subword);
    Some(StatsFormatInfo {
        pkt_width,
        pkt_offset: base + byte_width,
        byte_width,
        byte_offset: base,
        ones_rsvd,
    })
}

/// Long running timer eviction configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LrtConfig {
    pub enable: bool,
    pub pkt_threshold: u64,
    pub byte_threshold: u64,
    pub multiplier: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsAluConfig {
    pub pkt: bool,
    pub byte: bool,
    pub n_entries: u8,
    /// Signed adjustment added to the packet length before counting.
    pub byte_adjust: i32,
    pub lrt: LrtConfig,
}

/// Counts of one stats entry, as dumped by the sweeper or evicted by the long running timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatsEntry {
    pub addr: StatsAddr,
    pub pkts: u64,
    pub bytes: u64,
}

#[derive(Debug)]
pub struct MauStatsAlu {
    alu: usize,
    config: StatsAluConfig,
    full_resolution: bool,
    ram: MauSram,
    evictions: Vec<StatsEntry>,
    full_res: HashMap<(u32, u8), (u64, u64)>,
}

impl MauStatsAlu {
    #[must_use]
    pub fn new(alu: usize, config: StatsAluConfig, full_resolution: bool) -> Self {
        Self {
            alu,
            config,
            full_resolution,
            ram: MauSram::new(),
            evictions: Vec::new(),
            full_res: HashMap::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StatsAluConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: StatsAluConfig) {
        self.config = config;
    }

    #[must_use]
    pub fn ram(&self) -> &MauSram {
        &self.ram
    }

    fn format(&self, subword: u8) -> Result<StatsFormatInfo, MauError> {
        let c = &self.config;
        get_stats_format_info(c.pkt, c.byte, c.n_entries, subword).ok_or(
            MauError::InvalidStatsFormat {
                pkt: c.pkt,
                byte: c.byte,
                entries: c.n_entries,
                subword,
            },
        )
    }

    fn read_counts(word: &RamWord, fmt: &StatsFormatInfo) -> (u64, u64) {
        (
            word.get_word(fmt.pkt_offset, fmt.pkt_width),
            word.get_word(fmt.byte_offset, fmt.byte_width),
        )
    }

    fn write_counts(word: &mut RamWord, fmt: &StatsFormatInfo, pkts: u64, bytes: u64) {
        if fmt.pkt_width > 0 {
            word.set_word(pkts, fmt.pkt_offset, fmt.pkt_width);
        }
        if fmt.byte_width > 0 {
            word.set_word(bytes, fmt.byte_offset, fmt.byte_width);
        }
    }

    fn at_reserved_max(fmt: &StatsFormatInfo, pkts: u64, bytes: u64) -> bool {
        fmt.ones_rsvd
            && (fmt.pkt_width == 0 || pkts == mask64(fmt.pkt_width))
            && (fmt.byte_width == 0 || bytes == mask64(fmt.byte_width))
    }

    fn bump(value: u64, by: u64, width: usize, saturate: bool) -> u64 {
        let max = mask64(width);
        if saturate {
            value.saturating_add(by).min(max)
        } else {
            value.wrapping_add(by) & max
        }
    }

    /// Execute the op carried by `addr` for a packet of `pkt_len` bytes.
    ///
    /// Returns the RAM word for the config read ops. `wdata` is the data of a config write.
    #[tracing::instrument(level = "trace", skip(self, wdata), fields(alu = self.alu))]
    pub fn run_alu_with_state(
        &mut self,
        addr: StatsAddr,
        pkt_len: u32,
        wdata: Option<&RamWord>,
    ) -> Result<Option<RamWord>, MauError> {
        let word_addr = addr.word();
        match addr.op() {
            StatsOp::Nop => Ok(None),
            StatsOp::CfgRd => Ok(Some(self.ram.read(word_addr))),
            StatsOp::CfgRdClr => {
                let fmt = self.format(addr.subword())?;
                let mut word = self.ram.read(word_addr);
                let (pkts, bytes) = Self::read_counts(&word, &fmt);
                let data = word;
                if !Self::at_reserved_max(&fmt, pkts, bytes) {
                    Self::write_counts(&mut word, &fmt, 0, 0);
                    self.ram.write(word_addr, word);
                }
                Ok(Some(data))
            }
            StatsOp::CfgWr => {
                let data = wdata.copied().unwrap_or_default();
                self.ram.write(word_addr, data);
                Ok(None)
            }
            StatsOp::Stats => {
                self.count(addr, pkt_len)?;
                Ok(None)
            }
        }
    }

    fn count(&mut self, addr: StatsAddr, pkt_len: u32) -> Result<(), MauError> {
        let fmt = self.format(addr.subword())?;
        let adjusted = i64::from(pkt_len) + i64::from(self.config.byte_adjust);
        let len = u64::try_from(adjusted.max(0)).unwrap_or(0);

        if self.full_resolution {
            let shadow = self.full_res.entry((addr.word(), addr.subword())).or_default();
            shadow.0 = shadow.0.wrapping_add(1);
            shadow.1 = shadow.1.wrapping_add(len);
        }

        let mut word = self.ram.read(addr.word());
        let (pkts, bytes) = Self::read_counts(&word, &fmt);
        if Self::at_reserved_max(&fmt, pkts, bytes) {
            trace!("{addr}: counters frozen at reserved value");
            return Ok(());
        }
        let pkts = if fmt.pkt_width > 0 {
            Self::bump(pkts, 1, fmt.pkt_width, fmt.ones_rsvd)
        } else {
            0
        };
        let bytes = if fmt.byte_width > 0 {
            Self::bump(bytes, len, fmt.byte_width, fmt.ones_rsvd)
        } else {
            0
        };

        let lrt = &self.config.lrt;
        let over = |count: u64, threshold: u64| {
            u128::from(count) * u128::from(lrt.multiplier) > u128::from(threshold)
        };
        let evict = lrt.enable
            && !Self::at_reserved_max(&fmt, pkts, bytes)
            && ((fmt.pkt_width > 0 && over(pkts, lrt.pkt_threshold))
                || (fmt.byte_width > 0 && over(bytes, lrt.byte_threshold)));
        if evict {
            debug!(alu = self.alu, "LRT eviction of {addr}: {pkts} pkts {bytes} bytes");
            self.evictions.push(StatsEntry { addr, pkts, bytes });
            Self::write_counts(&mut word, &fmt, 0, 0);
        } else {
            Self::write_counts(&mut word, &fmt, pkts, bytes);
        }
        self.ram.write(addr.word(), word);
        Ok(())
    }

    /// Packet and byte count of the entry at `addr`.
    pub fn read_entry(&self, addr: StatsAddr) -> Result<(u64, u64), MauError> {
        let fmt = self.format(addr.subword())?;
        Ok(Self::read_counts(&self.ram.read(addr.word()), &fmt))
    }

    /// Full resolution packet and byte totals of the entry at `addr`, if tracked.
    #[must_use]
    pub fn full_res_stats(&self, addr: StatsAddr) -> Option<(u64, u64)> {
        self.full_res.get(&(addr.word(), addr.subword())).copied()
    }

    /// Take all pending LRT evictions.
    pub fn drain_lrt_evictions(&mut self) -> Vec<StatsEntry> {
        std::mem::take(&mut self.evictions)
    }

    /// Every entry of RAM word `word`.
    pub fn dump_word(&self, word: u32) -> Result<Vec<StatsEntry>, MauError> {
        let data = self.ram.read(word);
        (0..self.config.n_entries)
            .map(|subword| {
                let fmt = self.format(subword)?;
                let (pkts, bytes) = Self::read_counts(&data, &fmt);
                Ok(StatsEntry {
                    addr: StatsAddr::new(StatsOp::Stats, word, subword, true),
                    pkts,
                    bytes,
                })
            })
            .collect()
    }

    /// Dump the entries of RAM word `word` and zero them. Frozen entries are left in place.
    pub fn evict_word(&mut self, word: u32) -> Result<Vec<StatsEntry>, MauError> {
        let entries = self.dump_word(word)?;
        let mut data = self.ram.read(word);
        for entry in &entries {
            let fmt = self.format(entry.addr.subword())?;
            if !Self::at_reserved_max(&fmt, entry.pkts, entry.bytes) {
                Self::write_counts(&mut data, &fmt, 0, 0);
            }
        }
        self.ram.write(word, data);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stats_addr(word: u32, subword: u8) -> StatsAddr {
        StatsAddr::new(StatsOp::Stats, word, subword, true)
    }

    #[test]
    fn format_table() {
        let f = get_stats_format_info(true, true, 3, 2).expect("valid format");
        assert_eq!(f.byte_offset, 84);
        assert_eq!(f.byte_width, 25);
        assert_eq!(f.pkt_offset, 109);
        assert_eq!(f.pkt_width, 17);
        assert!(f.ones_rsvd);
        assert_eq!(get_stats_format_info(true, false, 6, 5).map(|f| f.pkt_offset), Some(105));
        assert_eq!(get_stats_format_info(true, false, 6, 6), None);
        assert_eq!(get_stats_format_info(true, false, 5, 0), None);
        assert_eq!(get_stats_format_info(false, false, 1, 0), None);
        let f = get_stats_format_info(false, true, 4, 3).expect("valid format");
        assert_eq!((f.byte_offset, f.byte_width, f.pkt_width), (96, 32, 0));
    }

    #[test]
    fn counts_packets_and_bytes() {
        let config = StatsAluConfig {
            pkt: true,
            byte: true,
            n_entries: 2,
            byte_adjust: -4,
            lrt: LrtConfig::default(),
        };
        let mut alu = MauStatsAlu::new(0, config, true);
        let addr = stats_addr(17, 1);
        for _ in 0..3 {
            alu.run_alu_with_state(addr, 64, None).expect("valid format");
        }
        assert_eq!(alu.read_entry(addr), Ok((3, 180)));
        assert_eq!(alu.read_entry(stats_addr(17, 0)), Ok((0, 0)));
        assert_eq!(alu.full_res_stats(addr), Some((3, 180)));

        // length adjustment floors at zero
        alu.run_alu_with_state(addr, 2, None).expect("valid format");
        assert_eq!(alu.read_entry(addr), Ok((4, 180)));

        let rd = StatsAddr::new(StatsOp::CfgRdClr, 17, 1, false);
        let word = alu.run_alu_with_state(rd, 0, None).expect("valid").expect("read data");
        assert_eq!(word.get_word(64 + 36, 28), 4);
        assert_eq!(alu.read_entry(addr), Ok((0, 0)));
    }

    #[test]
    fn invalid_subword_is_an_error() {
        let config = StatsAluConfig {
            pkt: true,
            byte: false,
            n_entries: 4,
            ..Default::default()
        };
        let mut alu = MauStatsAlu::new(1, config, false);
        assert!(matches!(
            alu.run_alu_with_state(stats_addr(0, 5), 64, None),
            Err(MauError::InvalidStatsFormat { subword: 5, .. })
        ));
    }

    #[test]
    fn reserved_max_is_frozen() {
        let config = StatsAluConfig {
            pkt: true,
            byte: true,
            n_entries: 3,
            byte_adjust: 0,
            lrt: LrtConfig {
                enable: true,
                pkt_threshold: 0,
                byte_threshold: 0,
                multiplier: 1,
            },
        };
        let mut alu = MauStatsAlu::new(0, config, false);
        let addr = stats_addr(3, 1);
        let fmt = get_stats_format_info(true, true, 3, 1).expect("valid format");
        let mut word = RamWord::new();
        word.set_word(mask64(17), fmt.pkt_offset, 17);
        word.set_word(mask64(25), fmt.byte_offset, 25);
        let wr = StatsAddr::new(StatsOp::CfgWr, 3, 0, false);
        alu.run_alu_with_state(wr, 0, Some(&word)).expect("write");
        bolero::check!().with_type::<u16>().cloned().for_each(|len| {
            let mut alu = MauStatsAlu::new(0, config, false);
            alu.run_alu_with_state(wr, 0, Some(&word)).expect("write");
            alu.run_alu_with_state(addr, u32::from(len), None).expect("valid format");
            assert_eq!(alu.ram().read(3), word);
            assert!(alu.drain_lrt_evictions().is_empty());
        });
        for _ in 0..10 {
            alu.run_alu_with_state(addr, 1500, None).expect("valid format");
        }
        assert_eq!(alu.read_entry(addr), Ok((mask64(17), mask64(25))));
        // reading with clear leaves the reserved value in place
        let rd = StatsAddr::new(StatsOp::CfgRdClr, 3, 1, false);
        alu.run_alu_with_state(rd, 0, None).expect("read");
        assert_eq!(alu.read_entry(addr), Ok((mask64(17), mask64(25))));
    }

    #[test]
    fn saturates_single_counter() {
        let config = StatsAluConfig {
            pkt: false,
            byte: true,
            n_entries: 3,
            ..Default::default()
        };
        let mut alu = MauStatsAlu::new(0, config, false);
        let addr = stats_addr(9, 0);
        let mut word = RamWord::new();
        word.set_word(mask64(42) - 10, 0, 42);
        alu.run_alu_with_state(StatsAddr::new(StatsOp::CfgWr, 9, 0, false), 0, Some(&word))
            .expect("write");
        alu.run_alu_with_state(addr, 100, None).expect("valid format");
        assert_eq!(alu.read_entry(addr), Ok((0, mask64(42))));
    }

    #[test]
    fn lrt_evicts_and_clears() {
        let config = StatsAluConfig {
            pkt: true,
            byte: true,
            n_entries: 1,
            byte_adjust: 0,
            lrt: LrtConfig {
                enable: true,
                pkt_threshold: 5,
                byte_threshold: u64::MAX,
                multiplier: 2,
            },
        };
        let mut alu = MauStatsAlu::new(2, config, false);
        let addr = stats_addr(1, 0);
        for _ in 0..2 {
            alu.run_alu_with_state(addr, 10, None).expect("valid format");
        }
        assert!(alu.drain_lrt_evictions().is_empty());
        // 3 * 2 > 5
        alu.run_alu_with_state(addr, 10, None).expect("valid format");
        let evicted = alu.drain_lrt_evictions();
        assert_eq!(
            evicted,
            vec![StatsEntry {
                addr,
                pkts: 3,
                bytes: 30
            }]
        );
        assert_eq!(alu.read_entry(addr), Ok((0, 0)));
        assert!(alu.drain_lrt_evictions().is_empty());
    }

    #[test]
    fn dump_and_evict_word() {
        let config = StatsAluConfig {
            pkt: true,
            byte: true,
            n_entries: 2,
            ..Default::default()
        };
        let mut alu = MauStatsAlu::new(0, config, false);
        alu.run_alu_with_state(stats_addr(4, 1), 64, None).expect("valid format");
        alu.run_alu_with_state(stats_addr(4, 1), 100, None).expect("valid format");
        let dumped = alu.dump_word(4).expect("valid format");
        assert_eq!(
            dumped,
            vec![
                StatsEntry {
                    addr: stats_addr(4, 0),
                    pkts: 0,
                    bytes: 0
                },
                StatsEntry {
                    addr: stats_addr(4, 1),
                    pkts: 2,
                    bytes: 164
                },
            ]
        );
        assert_eq!(alu.evict_word(4), Ok(dumped));
        assert_eq!(alu.read_entry(stats_addr(4, 1)), Ok((0, 0)));
    }
}
