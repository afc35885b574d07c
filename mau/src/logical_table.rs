// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Logical table configuration: how a table matches, which ALUs it drives and what it
//! writes back to the PHV.

use crate::address::{AddrFormat, MeterAddr, StatsAddr};
use crate::gateway::GatewayTable;
use derive_builder::Builder;
use phv::Gress;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MatchKind {
    /// Always hits with index 0.
    #[default]
    Keyless,
    /// Exact match on the columns of these SRAM rows assigned to the table.
    Exact { rows: Vec<usize> },
    /// Ternary match in one of the stage's TCAMs.
    Ternary { tcam: usize },
}

/// Where a PHV write takes its value from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionSource {
    Const(u32),
    HitIndex,
    StatefulOutput,
    Selection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhvWrite {
    pub word: usize,
    pub source: ActionSource,
}

/// The meter-type ALU a table addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeterAluRef {
    Stateful(usize),
    Selector(usize),
}

/// Stateful counter producing a table's meter address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterRef {
    pub counter: usize,
    /// Pop rather than push.
    pub pop: bool,
}

#[derive(Builder, Clone, Debug, PartialEq, Eq)]
#[builder(default)]
pub struct LogicalTable {
    pub gress: Gress,
    pub kind: MatchKind,
    pub gateway: Option<GatewayTable>,
    pub hit_next: Option<u16>,
    pub miss_next: Option<u16>,
    pub stats_alu: Option<usize>,
    pub stats_format: AddrFormat,
    pub miss_stats: Option<StatsAddr>,
    /// Defer the stats update to tEOP time.
    pub teop_stats: bool,
    pub meter_alu: Option<MeterAluRef>,
    pub meter_format: AddrFormat,
    pub miss_meter: Option<MeterAddr>,
    /// Defer the meter/stateful update to tEOP time, driven by the packet length.
    pub teop_meter: bool,
    pub stateful_counter: Option<CounterRef>,
    pub hit_actions: Vec<PhvWrite>,
    pub miss_actions: Vec<PhvWrite>,
}

impl Default for LogicalTable {
    fn default() -> Self {
        Self {
            gress: Gress::Ingress,
            kind: MatchKind::default(),
            gateway: None,
            hit_next: None,
            miss_next: None,
            stats_alu: None,
            stats_format: AddrFormat::default(),
            miss_stats: None,
            teop_stats: false,
            meter_alu: None,
            meter_format: AddrFormat::default(),
            miss_meter: None,
            teop_meter: false,
            stateful_counter: None,
            hit_actions: Vec::new(),
            miss_actions: Vec::new(),
        }
    }
}

impl LogicalTable {
    #[must_use]
    pub fn stats_addr(&self, hit: Option<u32>) -> Option<StatsAddr> {
        match hit {
            Some(index) => self.stats_alu.map(|_| self.stats_format.stats_addr(index)),
            None => self.miss_stats,
        }
    }

    #[must_use]
    pub fn meter_addr(&self, hit: Option<u32>) -> Option<MeterAddr> {
        match hit {
            Some(index) => self.meter_alu.map(|_| self.meter_format.meter_addr(index)),
            None => self.miss_meter,
        }
    }

    #[must_use]
    pub fn actions(&self, hit: bool) -> &[PhvWrite] {
        if hit { &self.hit_actions } else { &self.miss_actions }
    }

    #[must_use]
    pub fn next_table(&self, hit: bool) -> Option<u16> {
        if hit { self.hit_next } else { self.miss_next }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{MeterOp, StatsOp};
    use pretty_assertions::assert_eq;

    #[test]
    fn hit_and_miss_addresses() {
        let miss = StatsAddr::new(StatsOp::Stats, 0x3FF, 0, true);
        let table = LogicalTableBuilder::default()
            .stats_alu(Some(0))
            .stats_format(AddrFormat {
                shift: 3,
                base: 0,
                op: StatsOp::Stats as u8,
                pfe: true,
            })
            .miss_stats(Some(miss))
            .meter_alu(Some(MeterAluRef::Stateful(1)))
            .meter_format(AddrFormat {
                shift: 7,
                base: 0,
                op: MeterOp::Run1 as u8,
                pfe: true,
            })
            .build()
            .expect("valid table");
        let hit = table.stats_addr(Some(5)).expect("hit address");
        assert_eq!((hit.op(), hit.word()), (StatsOp::Stats, 5));
        assert_eq!(table.stats_addr(None), Some(miss));
        let meter = table.meter_addr(Some(9)).expect("hit address");
        assert_eq!((meter.op(), meter.word()), (MeterOp::Run1, 9));
        assert_eq!(table.meter_addr(None), None);
    }
}
