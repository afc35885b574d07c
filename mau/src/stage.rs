// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! One MAU stage: the resources of the stage, addressed by index, and the per packet walk
//! over its logical tables.

use crate::address::{MeterAddr, MeterOp};
use crate::error::MauError;
use crate::hash::{HashGroup, InputXbar, MatchInput};
use crate::idle::IdleTable;
use crate::io::{MauIo, table_id};
use crate::logical_table::{ActionSource, LogicalTable, MatchKind, MeterAluRef};
use crate::selector_alu::{MauSelectorAlu, SelectorAluConfig};
use crate::snapshot::{MauSnapshot, SnapshotConfig, SnapshotResults};
use crate::sram::{MauSram, RamWord};
use crate::sram_row::{AluDataConfig, BUS_HIT_BIT, BUSES_PER_ROW, MauSramRow};
use crate::stateful_alu::{MauStatefulAlu, StatefulAluConfig};
use crate::stateful_counters::{CounterConfig, MauStatefulCounters, NUM_COUNTERS};
use crate::stats_alu::{MauStatsAlu, StatsAluConfig, StatsEntry};
use crate::tcam::MauTcam;
use crate::teop::{MAX_LOGICAL_TABLES, MauTeop, Teop};
use config::ModelConfig;
use phv::{Gress, Phv, PhvLayout};
use std::sync::Arc;
use tracing::{debug, trace};

pub const NUM_ROWS: usize = 8;

#[derive(Debug)]
struct StatefulSlot {
    alu: MauStatefulAlu,
    row: usize,
    data: AluDataConfig,
}

#[derive(Debug)]
struct SelectorSlot {
    alu: MauSelectorAlu,
    ram: MauSram,
    hash_group: usize,
}

/// Results of the tables one packet ran through in a stage.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StageResults {
    pub lt_hit: u16,
    pub lt_inhibit: u16,
    pub bus_hits: Vec<u32>,
}

/// State of one packet's walk through the tables of a stage.
struct Walk<'a> {
    input: &'a MatchInput,
    results: StageResults,
    /// Compare outputs of the stateful ALUs that already ran.
    sbus: Vec<u8>,
}

#[derive(Debug)]
pub struct MauStage {
    stage: usize,
    config: Arc<ModelConfig>,
    xbar: InputXbar,
    hash_groups: Vec<HashGroup>,
    rows: Vec<MauSramRow>,
    tcams: Vec<MauTcam>,
    tables: Vec<Option<Arc<LogicalTable>>>,
    stats: Vec<MauStatsAlu>,
    stateful: Vec<StatefulSlot>,
    selectors: Vec<SelectorSlot>,
    counters: Option<MauStatefulCounters>,
    snapshots: [MauSnapshot; 2],
    /// Time of the last cycle each gress had no packet in this stage.
    last_nop: [u64; 2],
    teop: MauTeop,
    idle: Vec<Option<IdleTable>>,
}

fn invalid(what: String) -> MauError {
    MauError::InvalidConfig(what)
}

impl MauStage {
    pub fn new(stage: usize, config: Arc<ModelConfig>) -> Result<Self, MauError> {
        let layout = PhvLayout::new(config.chip);
        let snapshot = |gress| {
            MauSnapshot::new(
                stage,
                gress,
                SnapshotConfig::default(),
                layout,
                config.relax_snapshot_check,
            )
        };
        let snapshots = [snapshot(Gress::Ingress)?, snapshot(Gress::Egress)?];
        Ok(Self {
            stage,
            xbar: InputXbar::new(),
            hash_groups: Vec::new(),
            rows: (0..NUM_ROWS).map(|r| MauSramRow::new(r, &config)).collect(),
            tcams: Vec::new(),
            tables: vec![None; MAX_LOGICAL_TABLES],
            stats: Vec::new(),
            stateful: Vec::new(),
            selectors: Vec::new(),
            counters: None,
            snapshots,
            last_nop: [0; 2],
            teop: MauTeop::new(stage, &config),
            idle: vec![None; MAX_LOGICAL_TABLES],
            config,
        })
    }

    #[must_use]
    pub fn stage(&self) -> usize {
        self.stage
    }

    pub fn xbar_mut(&mut self) -> &mut InputXbar {
        &mut self.xbar
    }

    /// Add a hash group, returning its index.
    pub fn add_hash_group(&mut self, group: HashGroup) -> usize {
        self.hash_groups.push(group);
        self.hash_groups.len() - 1
    }

    pub fn row_mut(&mut self, row: usize) -> Result<&mut MauSramRow, MauError> {
        self.rows
            .get_mut(row)
            .ok_or_else(|| invalid(format!("stage {} has no row {row}", self.stage)))
    }

    pub fn add_tcam(&mut self, tcam: MauTcam) -> usize {
        self.tcams.push(tcam);
        self.tcams.len() - 1
    }

    pub fn tcam_mut(&mut self, tcam: usize) -> Option<&mut MauTcam> {
        self.tcams.get_mut(tcam)
    }

    #[tracing::instrument(level = "debug", skip(self, table), fields(stage = self.stage))]
    pub fn set_table(&mut self, lt: usize, table: LogicalTable) -> Result<(), MauError> {
        let slot = self
            .tables
            .get_mut(lt)
            .ok_or_else(|| invalid(format!("no logical table {lt}")))?;
        if table.teop_meter && matches!(table.meter_alu, Some(MeterAluRef::Selector(_))) {
            return Err(invalid(format!("lt {lt}: selector ALUs have no tEOP input")));
        }
        *slot = Some(Arc::new(table));
        Ok(())
    }

    #[must_use]
    pub fn table(&self, lt: usize) -> Option<&LogicalTable> {
        self.tables.get(lt).and_then(Option::as_deref)
    }

    pub fn add_stats_alu(&mut self, config: StatsAluConfig) -> usize {
        let alu = self.stats.len();
        self.stats
            .push(MauStatsAlu::new(alu, config, self.config.stats_full_resolution));
        alu
    }

    #[must_use]
    pub fn stats_alu(&self, alu: usize) -> Option<&MauStatsAlu> {
        self.stats.get(alu)
    }

    /// Add a stateful ALU fed from `row` with the given input data. Returns its index.
    pub fn add_stateful_alu(
        &mut self,
        config: StatefulAluConfig,
        row: usize,
        data: AluDataConfig,
    ) -> Result<usize, MauError> {
        if row >= NUM_ROWS {
            return Err(invalid(format!("stateful ALU on missing row {row}")));
        }
        let index = self.stateful.len();
        let alu = MauStatefulAlu::new(index, config, &self.config)?;
        self.stateful.push(StatefulSlot { alu, row, data });
        Ok(index)
    }

    #[must_use]
    pub fn stateful_alu(&self, alu: usize) -> Option<&MauStatefulAlu> {
        self.stateful.get(alu).map(|s| &s.alu)
    }

    pub fn stateful_alu_mut(&mut self, alu: usize) -> Option<&mut MauStatefulAlu> {
        self.stateful.get_mut(alu).map(|s| &mut s.alu)
    }

    /// Add a selector ALU hashing with `hash_group`. Returns its index.
    pub fn add_selector_alu(&mut self, config: SelectorAluConfig, hash_group: usize) -> usize {
        let index = self.selectors.len();
        self.selectors.push(SelectorSlot {
            alu: MauSelectorAlu::new(index, config, self.config.relax_selector_check),
            ram: MauSram::new(),
            hash_group,
        });
        index
    }

    pub fn selector_ram_mut(&mut self, alu: usize) -> Option<&mut MauSram> {
        self.selectors.get_mut(alu).map(|s| &mut s.ram)
    }

    pub fn set_stateful_counters(
        &mut self,
        configs: [CounterConfig; NUM_COUNTERS],
    ) -> Result<(), MauError> {
        if !self.config.chip.has_stateful_counters() {
            return Err(MauError::Unsupported {
                feature: "stateful counters",
                chip: self.config.chip,
            });
        }
        for (index, config) in configs.iter().enumerate() {
            config.validate().map_err(|e| match e {
                MauError::InvalidConfig(why) => {
                    MauError::InvalidConfig(format!("counter {index}: {why}"))
                }
                other => other,
            })?;
        }
        self.counters = Some(MauStatefulCounters::new(
            configs,
            self.config.synchronous_counter_clear,
        ));
        Ok(())
    }

    #[must_use]
    pub fn stateful_counters(&self) -> Option<&MauStatefulCounters> {
        self.counters.as_ref()
    }

    pub fn set_snapshot(&mut self, gress: Gress, config: SnapshotConfig) -> Result<(), MauError> {
        self.snapshots[gress.index()] = MauSnapshot::new(
            self.stage,
            gress,
            config,
            PhvLayout::new(self.config.chip),
            self.config.relax_snapshot_check,
        )?;
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self, gress: Gress) -> &MauSnapshot {
        &self.snapshots[gress.index()]
    }

    pub fn snapshot_mut(&mut self, gress: Gress) -> &mut MauSnapshot {
        &mut self.snapshots[gress.index()]
    }

    #[must_use]
    pub fn teop(&self) -> &MauTeop {
        &self.teop
    }

    pub fn teop_mut(&mut self) -> &mut MauTeop {
        &mut self.teop
    }

    pub fn set_idle_table(&mut self, lt: usize, interval: u8) -> Result<(), MauError> {
        let slot = self
            .idle
            .get_mut(lt)
            .ok_or_else(|| invalid(format!("no logical table {lt}")))?;
        *slot = Some(IdleTable::new(lt, interval));
        Ok(())
    }

    #[must_use]
    pub fn idle_table(&self, lt: usize) -> Option<&IdleTable> {
        self.idle.get(lt).and_then(Option::as_ref)
    }

    pub fn idle_table_mut(&mut self, lt: usize) -> Option<&mut IdleTable> {
        self.idle.get_mut(lt).and_then(Option::as_mut)
    }

    /// Logical tables with idle tracking and their sweep intervals.
    pub fn idle_tables(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.idle
            .iter()
            .enumerate()
            .filter_map(|(lt, t)| t.as_ref().map(|t| (lt, t.interval())))
    }

    fn match_table(
        &mut self,
        table: &LogicalTable,
        lt: usize,
        walk: &mut Walk<'_>,
    ) -> Result<Option<u32>, MauError> {
        let input = walk.input;
        Ok(match &table.kind {
            MatchKind::Keyless => Some(0),
            MatchKind::Ternary { tcam } => self
                .tcams
                .get(*tcam)
                .ok_or_else(|| invalid(format!("lt {lt}: no TCAM {tcam}")))?
                .lookup(input),
            MatchKind::Exact { rows } => {
                let mut hit = None;
                for &r in rows {
                    let row = self
                        .rows
                        .get_mut(r)
                        .ok_or_else(|| invalid(format!("lt {lt}: no row {r}")))?;
                    let driven = row.lookup(input, &self.hash_groups, lt)?;
                    for bus in (0..BUSES_PER_ROW).filter(|b| driven & (1 << b) != 0) {
                        if let Some(value) = row.match_output_bus(bus) {
                            walk.results.bus_hits.push(value as u32);
                            hit.get_or_insert((value & !BUS_HIT_BIT) as u32);
                        }
                    }
                }
                hit
            }
        })
    }

    fn run_meter_alu(
        &mut self,
        alu: MeterAluRef,
        addr: MeterAddr,
        input: &MatchInput,
        time: u64,
        sbus: &mut [u8],
    ) -> Result<(Option<u64>, Option<u8>), MauError> {
        match alu {
            MeterAluRef::Stateful(i) => {
                let slot = self
                    .stateful
                    .get_mut(i)
                    .ok_or_else(|| invalid(format!("no stateful ALU {i}")))?;
                let data = self.rows[slot.row].get_meter_stateful_selector_alu_data(
                    input,
                    &self.hash_groups,
                    &slot.data,
                );
                let out = slot.alu.run_alu_with_state(addr, &data, time, &sbus[..i])?;
                sbus[i] = out.compare;
                Ok((Some(out.action_data), None))
            }
            MeterAluRef::Selector(i) => {
                let slot = self
                    .selectors
                    .get_mut(i)
                    .ok_or_else(|| invalid(format!("no selector ALU {i}")))?;
                let hash = self
                    .hash_groups
                    .get(slot.hash_group)
                    .map_or(0, |g| g.compute(input));
                let word = slot.ram.read(addr.word());
                let out = slot.alu.run_alu_with_state(addr, time, word, hash)?;
                Ok((None, Some(out.index)))
            }
        }
    }

    fn counter_addr(&self, table: &LogicalTable) -> Option<MeterAddr> {
        let cref = table.stateful_counter?;
        let counters = self.counters.as_ref()?;
        let value = if cref.pop {
            counters.pop(cref.counter)?
        } else {
            counters.push(cref.counter)?
        };
        let op = MeterOp::from_repr(table.meter_format.op & 0x7).unwrap_or(MeterOp::Nop);
        Some(MeterAddr::from_stateful_value(op, u64::from(value), table.meter_format.pfe))
    }

    /// Run logical table `lt` for `phv`. Returns the next table.
    fn run_table(
        &mut self,
        lt: usize,
        table: &LogicalTable,
        phv: &mut Phv,
        io: &mut MauIo,
        walk: &mut Walk<'_>,
    ) -> Result<Option<u16>, MauError> {
        let gateway = table.gateway.as_ref().map(|g| g.lookup(walk.input));
        if let Some(gw) = gateway.filter(|gw| gw.inhibit) {
            walk.results.lt_inhibit |= 1 << lt;
            trace!(stage = self.stage, lt, "inhibited by gateway");
            return Ok(gw.next_table.or(table.miss_next));
        }
        let hit = self.match_table(table, lt, walk)?;
        if hit.is_some() {
            walk.results.lt_hit |= 1 << lt;
        }
        debug!(stage = self.stage, lt, ?hit, "table lookup");

        if let (Some(alu), Some(addr)) = (table.stats_alu, table.stats_addr(hit)) {
            if table.teop_stats {
                self.teop
                    .teop_output_stats_addr(&mut io.teop, lt, addr, io.pkt_len)?;
            } else {
                self.stats
                    .get_mut(alu)
                    .ok_or_else(|| invalid(format!("lt {lt}: no stats ALU {alu}")))?
                    .run_alu_with_state(addr, io.pkt_len, None)?;
            }
        }

        let (mut stateful_out, mut selection) = (None, None);
        if let Some(alu) = table.meter_alu {
            let addr = if table.stateful_counter.is_some() {
                self.counter_addr(table)
            } else {
                table.meter_addr(hit)
            };
            match addr {
                Some(addr) if table.teop_meter => {
                    self.teop
                        .teop_output_meter_addr(&mut io.teop, lt, addr, io.pkt_len)?;
                }
                Some(addr) => {
                    (stateful_out, selection) =
                        self.run_meter_alu(alu, addr, walk.input, io.time, &mut walk.sbus)?;
                }
                None => {}
            }
        }

        for write in table.actions(hit.is_some()) {
            let value = match write.source {
                ActionSource::Const(v) => v,
                ActionSource::HitIndex => hit.unwrap_or(0),
                ActionSource::StatefulOutput => stateful_out.unwrap_or(0) as u32,
                ActionSource::Selection => u32::from(selection.unwrap_or(0)),
            };
            phv.set(write.word, value)?;
        }

        if let (Some(index), Some(idle)) = (hit, self.idle.get_mut(lt).and_then(Option::as_mut)) {
            idle.hit(index);
        }
        let next = table.next_table(hit.is_some());
        Ok(gateway.and_then(|gw| gw.next_table).or(next))
    }

    /// Run the tables of this stage that `io` selects for `phv`.
    pub fn process(
        &mut self,
        gress: Gress,
        phv: &mut Phv,
        io: &mut MauIo,
    ) -> Result<StageResults, MauError> {
        let g = gress.index();
        let input = self.xbar.build(phv);
        self.snapshots[g].advance_time(io.time, phv.relative_time(), self.last_nop[g]);
        let triggered = self.snapshots[g].maybe_capture(phv, io.triggered(gress));
        self.rows.iter_mut().for_each(MauSramRow::reset_resources);

        let mut walk = Walk {
            input: &input,
            results: StageResults::default(),
            sbus: vec![0; self.stateful.len()],
        };
        for lt in 0..MAX_LOGICAL_TABLES {
            let Some(table) = self.tables[lt].clone() else {
                continue;
            };
            if table.gress != gress || io.next_table(gress) != Some(table_id(self.stage, lt)) {
                continue;
            }
            let next = self.run_table(lt, &table, phv, io, &mut walk)?;
            io.set_next_table(gress, next);
        }

        let results = walk.results;
        self.snapshots[g].finalize_snapshot(
            phv,
            SnapshotResults {
                next_table: io.next_table(gress),
                physical_bus_hits: &results.bus_hits,
                lt_hit: results.lt_hit,
                lt_inhibit: results.lt_inhibit,
            },
        );
        io.snapshot_triggered[g] = triggered;
        Ok(results)
    }

    /// Account for a cycle at `time` in which `gress` had no packet in this stage.
    pub fn process_nop(&mut self, gress: Gress, time: u64) {
        let g = gress.index();
        self.last_nop[g] = self.last_nop[g].max(time);
        self.snapshots[g].advance_time(0, 0, self.last_nop[g]);
    }

    #[must_use]
    pub fn last_nop(&self, gress: Gress) -> u64 {
        self.last_nop[gress.index()]
    }

    /// Deliver the tEOP bus contents to this stage's ALUs.
    pub fn process_teop(&mut self, teop: &Teop, time: u64) -> Result<(), MauError> {
        for (i, alu) in self.stats.iter_mut().enumerate() {
            if let Some((addr, len)) = self.teop.teop_input_stats_addr(teop, i) {
                alu.run_alu_with_state(addr, len, None)?;
            }
        }
        for (i, slot) in self.stateful.iter_mut().enumerate() {
            if let Some((addr, len)) = self.teop.teop_input_meter_addr(teop, i) {
                let data = RamWord::from_u64(u64::from(len));
                slot.alu.run_alu_with_state(addr, &data, time, &[])?;
            }
        }
        Ok(())
    }

    /// Age the idle table of `lt`, returning the entries that became idle.
    pub fn sweep_idle(&mut self, lt: usize) -> Vec<u32> {
        self.idle_table_mut(lt).map(IdleTable::sweep).unwrap_or_default()
    }

    /// Take the pending LRT evictions of every stats ALU.
    pub fn drain_lrt_evictions(&mut self) -> Vec<(usize, StatsEntry)> {
        self.stats
            .iter_mut()
            .enumerate()
            .flat_map(|(i, alu)| alu.drain_lrt_evictions().into_iter().map(move |e| (i, e)))
            .collect()
    }

    /// Dump the stats of table `lt`: one RAM word, or every word holding a non-zero count.
    pub fn dump_stats(&self, lt: usize, word: Option<u32>) -> Result<Vec<StatsEntry>, MauError> {
        let Some(alu) = self.table_stats_alu(lt).and_then(|a| self.stats.get(a)) else {
            return Ok(Vec::new());
        };
        let mut words: Vec<u32> = match word {
            Some(word) => vec![word],
            None => alu.ram().occupied().collect(),
        };
        words.sort_unstable();
        let mut entries = Vec::new();
        for word in words {
            entries.extend(alu.dump_word(word)?);
        }
        Ok(entries)
    }

    /// Dump and clear one stats RAM word of table `lt`.
    pub fn evict_stats(&mut self, lt: usize, word: u32) -> Result<Vec<StatsEntry>, MauError> {
        match self.table_stats_alu(lt).and_then(|a| self.stats.get_mut(a)) {
            Some(alu) => alu.evict_word(word),
            None => Ok(Vec::new()),
        }
    }

    fn table_stats_alu(&self, lt: usize) -> Option<usize> {
        self.table(lt).and_then(|t| t.stats_alu)
    }

    /// Advance scheduled stateful counter clears to logical time `t`.
    pub fn continue_counter_clears(&mut self, t: u64) -> usize {
        let Some(counters) = &self.counters else {
            return 0;
        };
        (0..NUM_COUNTERS)
            .map(|c| counters.continue_clear_till(c, t).len())
            .sum()
    }
}
