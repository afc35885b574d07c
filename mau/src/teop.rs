// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! tEOP: delivery of deferred meter and stats addresses at the end of a packet.
//!
//! A logical table puts its meter/stats address on a tEOP bus at header time; at tEOP time
//! the bus delivers it, with the packet length, to the ALUs listening on that bus. The routing
//! registers of a stage live in a [`ConfigStore`]; the per table bus bitmaps derived from them
//! are cached and recomputed after any register write.

use crate::address::{MeterAddr, StatsAddr};
use crate::error::{MauError, relaxable};
use config::{ConfigStore, ModelConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, trace};

pub const NUM_TEOP_BUSES: usize = 4;
pub const MAX_LOGICAL_TABLES: usize = 16;
/// Enable bit of a `BusHdrtimeLt` register.
pub const HDRTIME_ENABLE: u64 = 1 << 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TeopField {
    /// Meter ALUs (bitmap) fed by a logical table.
    LtMeterAluSel(usize),
    /// Stats ALUs (bitmap) fed by a logical table.
    LtStatsAluSel(usize),
    /// Logical table driving a bus at header time, bit 4 enables.
    BusHdrtimeLt(usize),
    /// Meter ALUs (bitmap) listening on a bus at tEOP time.
    BusMeterAluSel(usize),
    /// Stats ALUs (bitmap) listening on a bus at tEOP time.
    BusStatsAluSel(usize),
    BusDelay(usize),
    /// Non zero when the stage is match dependent on its predecessor.
    MatchDependent,
}

#[derive(Debug, Default)]
struct BusCache {
    hdrtime: [u8; MAX_LOGICAL_TABLES],
    teoptime: [u8; MAX_LOGICAL_TABLES],
}

#[derive(Debug)]
pub struct MauTeop {
    stage: usize,
    store: ConfigStore<TeopField>,
    dirty: Arc<AtomicBool>,
    cache: BusCache,
    pipe_latency: u64,
    predication_delay: u64,
    relax_teop_check: bool,
    strict_delay_check: bool,
}

/// Bus contents for one packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TeopBus {
    pub stage: usize,
    pub lt: usize,
    pub meter_addr: Option<MeterAddr>,
    pub stats_addr: Option<StatsAddr>,
    pub byte_len: u32,
}

/// Per packet tEOP bus state, carried from stage to stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Teop {
    buses: [TeopBus; NUM_TEOP_BUSES],
}

impl Teop {
    #[must_use]
    pub fn bus(&self, bus: usize) -> Option<&TeopBus> {
        self.buses.get(bus)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buses
            .iter()
            .all(|b| b.meter_addr.is_none() && b.stats_addr.is_none())
    }
}

fn bits(mask: u8) -> impl Iterator<Item = usize> {
    (0..NUM_TEOP_BUSES).filter(move |b| mask & (1 << b) != 0)
}

impl MauTeop {
    #[must_use]
    pub fn new(stage: usize, config: &ModelConfig) -> Self {
        let dirty = Arc::new(AtomicBool::new(true));
        let mut store = ConfigStore::new();
        let flag = dirty.clone();
        store.subscribe_all(Box::new(move |_, _| flag.store(true, Ordering::Release)));
        Self {
            stage,
            store,
            dirty,
            cache: BusCache::default(),
            pipe_latency: u64::from(config.pipe_latency),
            predication_delay: u64::from(config.predication_delay),
            relax_teop_check: config.relax_teop_check,
            strict_delay_check: config.strict_teop_delay_check,
        }
    }

    #[must_use]
    pub fn stage(&self) -> usize {
        self.stage
    }

    pub fn set_field(&mut self, field: TeopField, value: u64) {
        self.store.set_field(field, value);
    }

    #[must_use]
    pub fn get_field(&self, field: TeopField) -> u64 {
        self.store.get_field(field)
    }

    fn refresh(&mut self) {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        let mut cache = BusCache::default();
        for bus in 0..NUM_TEOP_BUSES {
            let hdr = self.store.get_field(TeopField::BusHdrtimeLt(bus));
            if hdr & HDRTIME_ENABLE != 0 {
                cache.hdrtime[(hdr & 0xF) as usize] |= 1 << bus;
            }
            let meters = self.store.get_field(TeopField::BusMeterAluSel(bus));
            let stats = self.store.get_field(TeopField::BusStatsAluSel(bus));
            for lt in 0..MAX_LOGICAL_TABLES {
                let lt_meters = self.store.get_field(TeopField::LtMeterAluSel(lt));
                let lt_stats = self.store.get_field(TeopField::LtStatsAluSel(lt));
                if meters & lt_meters != 0 || stats & lt_stats != 0 {
                    cache.teoptime[lt] |= 1 << bus;
                }
            }
        }
        trace!(stage = self.stage, "tEOP bus cache rebuilt: {cache:?}");
        self.cache = cache;
    }

    /// Buses logical table `lt` drives at header time.
    pub fn teop_buses_at_hdrtime(&mut self, lt: usize) -> u8 {
        self.refresh();
        self.cache.hdrtime.get(lt).copied().unwrap_or(0)
    }

    /// Buses delivering to the ALUs logical table `lt` uses.
    pub fn teop_buses_at_teoptime(&mut self, lt: usize) -> u8 {
        self.refresh();
        self.cache.teoptime.get(lt).copied().unwrap_or(0)
    }

    /// Buses any logical table of this stage drives at header time.
    pub fn buses_used_at_hdrtime(&mut self) -> u8 {
        self.refresh();
        self.cache.hdrtime.iter().fold(0, |acc, b| acc | b)
    }

    #[must_use]
    pub fn match_dependent(&self) -> bool {
        self.store.get_field(TeopField::MatchDependent) != 0
    }

    /// Delay `bus` needs in this stage, given whether an earlier stage drives it at header time.
    pub fn teop_delay_required(&mut self, bus: usize, used_earlier: bool) -> u64 {
        if self.match_dependent() && used_earlier {
            self.pipe_latency.saturating_sub(4)
        } else if self.buses_used_at_hdrtime() & (1 << bus) != 0 {
            self.pipe_latency
                .saturating_sub(self.predication_delay)
                .saturating_sub(7)
        } else {
            0
        }
    }

    /// Compare the configured delay of every bus this stage drives against the required one.
    /// Mismatches are logged; they only fail when strict delay checking is configured.
    pub fn check_delays(&mut self, used_earlier: u8) -> Result<(), MauError> {
        let used = self.buses_used_at_hdrtime();
        for bus in bits(used) {
            let required = self.teop_delay_required(bus, used_earlier & (1 << bus) != 0);
            let configured = self.store.get_field(TeopField::BusDelay(bus));
            if configured != required {
                let err = MauError::TeopDelayMismatch {
                    bus,
                    configured,
                    required,
                };
                if self.strict_delay_check {
                    error!(stage = self.stage, "{err}");
                    return Err(err);
                }
                error!(stage = self.stage, "{err} (not enforced)");
            }
        }
        Ok(())
    }

    fn output(
        &mut self,
        teop: &mut Teop,
        lt: usize,
        kind: &'static str,
        mut put: impl FnMut(&mut TeopBus) -> bool,
    ) -> Result<(), MauError> {
        for bus in bits(self.teop_buses_at_hdrtime(lt)) {
            let slot = &mut teop.buses[bus];
            if !put(slot) {
                relaxable(
                    self.relax_teop_check,
                    MauError::TeopBusCollision {
                        bus,
                        kind,
                        stage: slot.stage,
                        lt: slot.lt,
                    },
                )?;
                continue;
            }
            slot.stage = self.stage;
            slot.lt = lt;
            debug!(stage = self.stage, lt, bus, "{kind} address on tEOP bus");
        }
        Ok(())
    }

    /// Put a meter address on the buses `lt` drives.
    pub fn teop_output_meter_addr(
        &mut self,
        teop: &mut Teop,
        lt: usize,
        addr: MeterAddr,
        byte_len: u32,
    ) -> Result<(), MauError> {
        self.output(teop, lt, "meter", |slot| {
            if slot.meter_addr.is_some() {
                return false;
            }
            slot.meter_addr = Some(addr);
            slot.byte_len = byte_len;
            true
        })
    }

    /// Put a stats address on the buses `lt` drives.
    pub fn teop_output_stats_addr(
        &mut self,
        teop: &mut Teop,
        lt: usize,
        addr: StatsAddr,
        byte_len: u32,
    ) -> Result<(), MauError> {
        self.output(teop, lt, "stats", |slot| {
            if slot.stats_addr.is_some() {
                return false;
            }
            slot.stats_addr = Some(addr);
            slot.byte_len = byte_len;
            true
        })
    }

    /// Meter address and packet length delivered to meter ALU `alu` at tEOP time.
    #[must_use]
    pub fn teop_input_meter_addr(&self, teop: &Teop, alu: usize) -> Option<(MeterAddr, u32)> {
        (0..NUM_TEOP_BUSES)
            .filter(|b| self.store.get_field(TeopField::BusMeterAluSel(*b)) & (1 << alu) != 0)
            .find_map(|b| teop.buses[b].meter_addr.map(|a| (a, teop.buses[b].byte_len)))
    }

    /// Stats address and packet length delivered to stats ALU `alu` at tEOP time.
    #[must_use]
    pub fn teop_input_stats_addr(&self, teop: &Teop, alu: usize) -> Option<(StatsAddr, u32)> {
        (0..NUM_TEOP_BUSES)
            .filter(|b| self.store.get_field(TeopField::BusStatsAluSel(*b)) & (1 << alu) != 0)
            .find_map(|b| teop.buses[b].stats_addr.map(|a| (a, teop.buses[b].byte_len)))
    }
}

/// Check the configured delays of every stage of a pipe, in stage order.
pub fn check_teop_delays<'a>(
    stages: impl IntoIterator<Item = &'a mut MauTeop>,
) -> Result<(), MauError> {
    let mut used_earlier = 0u8;
    for teop in stages {
        teop.check_delays(used_earlier)?;
        used_earlier |= teop.buses_used_at_hdrtime();
    }
    Ok(())
}
