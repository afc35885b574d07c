// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! One physical SRAM row: exact match hashing, output bus arbitration and ALU input data.

use crate::error::{MauError, relaxable};
use crate::hash::{HASH_BITS, HashGroup, MatchInput};
use crate::sram::{MauSram, RamWord};
use bitvector::{BitVector, mask64};
use config::ModelConfig;
use derive_builder::Builder;
use std::fmt::Display;
use tracing::{debug, trace};

pub const COLUMNS_PER_ROW: usize = 12;
pub const BUSES_PER_ROW: usize = 2;
/// Width of the way (RAM index) slice of a hash.
pub const WAY_BITS: u8 = 10;
/// Bit marking a valid exact match entry.
pub const ENTRY_VALID_BIT: usize = 127;
/// Bit marking a driven match/tind bus value.
pub const BUS_HIT_BIT: u64 = 1 << 31;

// Arbitration priority of each column and its priority group.
const PRIORITY_PER_COLUMN: [u8; COLUMNS_PER_ROW] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
const PRI_GROUP_PER_COLUMN: [u8; COLUMNS_PER_ROW] = [0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusKind {
    Match,
    Tind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BusSlot {
    value: u64,
    priority: u8,
    group: u8,
}

/// Exact match configuration of one SRAM column.
#[derive(Builder, Clone, Debug, Default, PartialEq, Eq)]
#[builder(default)]
pub struct ExactMatchColumn {
    pub logical_table: usize,
    pub hash_group: usize,
    /// Lsb of the way slice within the hash group output.
    pub way_lsb: u8,
    pub select_lsb: u8,
    pub select_width: u8,
    /// Value the select slice must have for this column to be looked up.
    pub select_value: u32,
    pub vpn: u8,
    /// Match bus the column drives.
    pub bus: usize,
    /// Input bytes compared against the stored key, key byte 0 first.
    pub key_bytes: Vec<usize>,
    /// Input bytes that must be valid for the hash to be usable.
    pub required_valid: Vec<usize>,
}

/// How to build the 128-bit input of a meter, stateful or selector ALU.
#[derive(Builder, Clone, Debug, Default, PartialEq, Eq)]
#[builder(default)]
pub struct AluDataConfig {
    pub hash_group: Option<usize>,
    pub hash_lsb: u8,
    pub hash_width: u8,
    /// Destination bit of the hash slice.
    pub hash_dest: u8,
    /// `(input byte, destination byte)` pairs taken straight from the match input.
    pub phv_bytes: Vec<(usize, usize)>,
}

#[derive(Debug)]
pub struct MauSramRow {
    row: usize,
    relax_bus_check: bool,
    relax_sram_vpn_check: bool,
    columns: Vec<Option<ExactMatchColumn>>,
    rams: Vec<MauSram>,
    match_bus: [Option<BusSlot>; BUSES_PER_ROW],
    tind_bus: [Option<BusSlot>; BUSES_PER_ROW],
}

impl Display for BusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusKind::Match => write!(f, "match bus"),
            BusKind::Tind => write!(f, "tind bus"),
        }
    }
}

impl MauSramRow {
    #[must_use]
    pub fn new(row: usize, config: &ModelConfig) -> Self {
        Self {
            row,
            relax_bus_check: config.relax_bus_check,
            relax_sram_vpn_check: config.relax_sram_vpn_check,
            columns: vec![None; COLUMNS_PER_ROW],
            rams: vec![MauSram::new(); COLUMNS_PER_ROW],
            match_bus: [None; BUSES_PER_ROW],
            tind_bus: [None; BUSES_PER_ROW],
        }
    }

    #[must_use]
    pub fn row(&self) -> usize {
        self.row
    }

    /// Configure a column for exact match.
    pub fn configure_column(
        &mut self,
        col: usize,
        column: ExactMatchColumn,
    ) -> Result<(), MauError> {
        if col >= COLUMNS_PER_ROW {
            return Err(MauError::InvalidConfig(format!("row {} has no column {col}", self.row)));
        }
        if column.bus >= BUSES_PER_ROW {
            return Err(MauError::InvalidConfig(format!(
                "row {} column {col}: no match bus {}",
                self.row, column.bus
            )));
        }
        let way_end = usize::from(column.way_lsb) + usize::from(WAY_BITS);
        let select_end = usize::from(column.select_lsb) + usize::from(column.select_width);
        if way_end > HASH_BITS
            || select_end > HASH_BITS
            || column.select_width > 32
            || column.vpn >= 64
        {
            relaxable(
                self.relax_sram_vpn_check,
                MauError::SramVpn(format!(
                    "row {} column {col}: way/select slice outside the hash or VPN {} too large",
                    self.row, column.vpn
                )),
            )?;
        }
        if self
            .columns
            .iter()
            .enumerate()
            .filter_map(|(c, cfg)| cfg.as_ref().map(|cfg| (c, cfg)))
            .any(|(c, other)| {
                c != col
                    && other.logical_table == column.logical_table
                    && other.vpn == column.vpn
                    && other.select_value == column.select_value
            })
        {
            relaxable(
                self.relax_sram_vpn_check,
                MauError::SramVpn(format!(
                    "row {} column {col}: VPN {} already used by table {}",
                    self.row, column.vpn, column.logical_table
                )),
            )?;
        }
        debug!(row = self.row, col, "configured exact match column: {column:?}");
        self.columns[col] = Some(column);
        Ok(())
    }

    #[must_use]
    pub fn column(&self, col: usize) -> Option<&ExactMatchColumn> {
        self.columns.get(col).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn ram(&self, col: usize) -> Option<&MauSram> {
        self.rams.get(col)
    }

    pub fn ram_mut(&mut self, col: usize) -> Option<&mut MauSram> {
        self.rams.get_mut(col)
    }

    /// Store an exact match entry (`key`, least significant byte first) at `way` of `col`.
    pub fn write_entry(&mut self, col: usize, way: u16, key: &[u8]) -> Result<(), MauError> {
        if key.len() > ENTRY_VALID_BIT / 8 {
            return Err(MauError::InvalidConfig(format!("key of {} bytes is too long", key.len())));
        }
        let ram = self
            .rams
            .get_mut(col)
            .ok_or_else(|| MauError::InvalidConfig(format!("no column {col}")))?;
        let mut word = RamWord::new();
        for (i, b) in key.iter().enumerate() {
            word.set_byte(*b, i);
        }
        word.set_bit(ENTRY_VALID_BIT);
        ram.write(u32::from(way) & 0x3FF, word);
        Ok(())
    }

    /// Exact match RAM index computed by `col`'s hash, or `None` (the hardware's -1) if the
    /// column is unconfigured or a byte required by the hash is invalid.
    #[must_use]
    pub fn get_hash_index(
        &self,
        input: &MatchInput,
        groups: &[HashGroup],
        col: usize,
    ) -> Option<u16> {
        let column = self.column(col)?;
        if !input.all_valid(&column.required_valid) {
            trace!(row = self.row, col, "hash input invalid");
            return None;
        }
        let hash = groups.get(column.hash_group)?.compute(input);
        Some(((hash >> column.way_lsb) & mask64(usize::from(WAY_BITS))) as u16)
    }

    /// Look up one column. Returns the hit address `(vpn << 10) | way`.
    #[must_use]
    pub fn lookup_column(
        &self,
        input: &MatchInput,
        groups: &[HashGroup],
        col: usize,
    ) -> Option<u32> {
        let column = self.column(col)?;
        let way = self.get_hash_index(input, groups, col)?;
        let hash = groups.get(column.hash_group)?.compute(input);
        let select = (hash >> column.select_lsb) & mask64(usize::from(column.select_width));
        if select != u64::from(column.select_value) {
            return None;
        }
        let word = self.rams[col].read(u32::from(way));
        if !word.get_bit(ENTRY_VALID_BIT) {
            return None;
        }
        let matches = column
            .key_bytes
            .iter()
            .enumerate()
            .all(|(i, b)| word.get_byte(i) == input.byte(*b));
        matches.then(|| (u32::from(column.vpn) << WAY_BITS) | u32::from(way))
    }

    /// Look up every column of logical table `lt`, driving hits onto the columns' match buses.
    /// Returns the buses that were driven.
    pub fn lookup(
        &mut self,
        input: &MatchInput,
        groups: &[HashGroup],
        lt: usize,
    ) -> Result<u8, MauError> {
        let mut driven = 0u8;
        for col in 0..COLUMNS_PER_ROW {
            let Some(column) = self.column(col) else {
                continue;
            };
            if column.logical_table != lt {
                continue;
            }
            let bus = column.bus;
            if let Some(addr) = self.lookup_column(input, groups, col) {
                trace!(row = self.row, col, lt, "exact match hit at {addr:#x}");
                self.set_match_output_bus(bus, BUS_HIT_BIT | u64::from(addr), col)?;
                driven |= 1 << bus;
            }
        }
        Ok(driven)
    }

    fn set_output_bus(
        &mut self,
        kind: BusKind,
        bus: usize,
        output: u64,
        col: usize,
    ) -> Result<(), MauError> {
        if bus >= BUSES_PER_ROW || col >= COLUMNS_PER_ROW {
            return Err(MauError::InvalidConfig(format!(
                "row {}: no {kind} {bus} or column {col}",
                self.row
            )));
        }
        let priority = PRIORITY_PER_COLUMN[col];
        let group = PRI_GROUP_PER_COLUMN[col];
        let incoming = BusSlot {
            value: output,
            priority,
            group,
        };
        let current = match kind {
            BusKind::Match => self.match_bus[bus],
            BusKind::Tind => self.tind_bus[bus],
        };
        let next = match current {
            None => incoming,
            Some(current) if current.group == group => {
                // partial hits of the same table merge
                BusSlot {
                    value: current.value | output,
                    priority: current.priority.max(priority),
                    group,
                }
            }
            Some(current) if priority > current.priority => {
                relaxable(
                    self.relax_bus_check,
                    MauError::BusPriorityOverride {
                        row: self.row,
                        bus: format!("{kind} {bus}"),
                        col,
                    },
                )?;
                incoming
            }
            Some(_) => {
                trace!(row = self.row, col, "lower priority write to {kind} {bus} ignored");
                return Ok(());
            }
        };
        match kind {
            BusKind::Match => self.match_bus[bus] = Some(next),
            BusKind::Tind => self.tind_bus[bus] = Some(next),
        }
        Ok(())
    }

    /// Drive `output` onto match bus `bus` from column `col`.
    ///
    /// Writes from the same priority group are ORed together. A write from a different group
    /// with strictly higher priority overrides the bus and is reported. Anything else is ignored.
    pub fn set_match_output_bus(
        &mut self,
        bus: usize,
        output: u64,
        col: usize,
    ) -> Result<(), MauError> {
        self.set_output_bus(BusKind::Match, bus, output, col)
    }

    /// Drive `output` onto ternary indirection bus `bus`, with the same arbitration as
    /// [`MauSramRow::set_match_output_bus`].
    pub fn set_tind_output_bus(
        &mut self,
        bus: usize,
        output: u64,
        col: usize,
    ) -> Result<(), MauError> {
        self.set_output_bus(BusKind::Tind, bus, output, col)
    }

    #[must_use]
    pub fn match_output_bus(&self, bus: usize) -> Option<u64> {
        self.match_bus.get(bus).copied().flatten().map(|s| s.value)
    }

    #[must_use]
    pub fn tind_output_bus(&self, bus: usize) -> Option<u64> {
        self.tind_bus.get(bus).copied().flatten().map(|s| s.value)
    }

    /// Combine a hash slice and raw match input bytes into the input of a meter, stateful
    /// or selector ALU. The two sources are ORed.
    #[must_use]
    pub fn get_meter_stateful_selector_alu_data(
        &self,
        input: &MatchInput,
        groups: &[HashGroup],
        cfg: &AluDataConfig,
    ) -> BitVector<128> {
        let mut data = BitVector::<128>::new();
        if let Some(group) = cfg.hash_group.and_then(|g| groups.get(g)) {
            let width = usize::from(cfg.hash_width).min(HASH_BITS);
            let slice = (group.compute(input) >> cfg.hash_lsb) & mask64(width);
            data.set_word(slice, usize::from(cfg.hash_dest), width);
        }
        let mut raw = BitVector::<128>::new();
        for (src, dst) in &cfg.phv_bytes {
            if input.valid.get_bit(*src) {
                raw.set_byte(input.byte(*src), *dst);
            }
        }
        data |= raw;
        data
    }

    /// Release the per-cycle bus resources.
    pub fn reset_resources(&mut self) {
        self.match_bus = [None; BUSES_PER_ROW];
        self.tind_bus = [None; BUSES_PER_ROW];
    }
}
