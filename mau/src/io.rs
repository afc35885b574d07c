// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per packet state carried from one MAU stage to the next.

use crate::teop::Teop;
use phv::Gress;

/// Global id of logical table `lt` of `stage`.
#[must_use]
pub const fn table_id(stage: usize, lt: usize) -> u16 {
    ((stage << 4) | (lt & 0xF)) as u16
}

/// Stage of a global table id.
#[must_use]
pub const fn table_stage(id: u16) -> usize {
    (id >> 4) as usize
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MauIo {
    /// Next table to run per gress, `None` once a gress is done.
    next_table: [Option<u16>; 2],
    /// Snapshot trigger raised by an earlier stage, per gress.
    pub snapshot_triggered: [bool; 2],
    pub teop: Teop,
    /// Packet length counted by stats ALUs.
    pub pkt_len: u32,
    /// Global cycle time the packet entered the stage.
    pub time: u64,
}

impl MauIo {
    #[must_use]
    pub fn new(gress: Gress, first_table: Option<u16>, pkt_len: u32, time: u64) -> Self {
        let mut io = Self {
            pkt_len,
            time,
            ..Self::default()
        };
        io.set_next_table(gress, first_table);
        io
    }

    #[must_use]
    pub fn next_table(&self, gress: Gress) -> Option<u16> {
        self.next_table[gress.index()]
    }

    pub fn set_next_table(&mut self, gress: Gress, table: Option<u16>) {
        self.next_table[gress.index()] = table;
    }

    #[must_use]
    pub fn triggered(&self, gress: Gress) -> bool {
        self.snapshot_triggered[gress.index()]
    }
}
