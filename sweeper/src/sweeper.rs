// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The sweeper: queued table operations and the interval driven idle sweep.

use crate::error::SweeperError;
use crate::table::{AddrType, Op, OpKind, TableInfo, TableKey};
use config::ModelConfig;
use hashbrown::HashMap;
use mau::stats_alu::StatsEntry;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Number of interval codes.
pub const NUM_INTERVALS: u8 = 32;

/// The work the sweeper hands to whoever owns the pipes.
pub trait SweepHandler: Send + Sync {
    /// Age the idle counters of a table. Returns the entries that became idle.
    fn age_idle(&self, table: TableKey) -> Result<Vec<u32>, SweeperError>;
    /// Idle counters of every tracked entry of a table.
    fn dump_idle(&self, table: TableKey) -> Result<Vec<(u32, u8)>, SweeperError>;
    /// Stats of a table: one RAM word, or all of them.
    fn dump_stats(
        &self,
        table: TableKey,
        word: Option<u32>,
    ) -> Result<Vec<StatsEntry>, SweeperError>;
    /// Dump and clear one stats RAM word of a table.
    fn evict_stats(&self, table: TableKey, word: u32) -> Result<Vec<StatsEntry>, SweeperError>;
    /// Per tick stage upkeep at `cycles`. Returns the LRT evictions of the stage's stats ALUs.
    fn sweep_stage(
        &self,
        pipe: usize,
        stage: usize,
        cycles: u64,
    ) -> Result<Vec<(usize, StatsEntry)>, SweeperError>;
}

/// What the sweeper reports back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Idle { table: TableKey, entries: Vec<u32> },
    IdleDump { table: TableKey, entries: Vec<(u32, u8)> },
    Stats { table: TableKey, entries: Vec<StatsEntry> },
    Evicted { pipe: usize, stage: usize, alu: usize, entry: StatsEntry },
    Barrier(u64),
}

#[derive(Debug, Default)]
struct OpQueues {
    hi: VecDeque<Op>,
    lo: VecDeque<Op>,
}

impl OpQueues {
    fn pop(&mut self) -> Option<Op> {
        self.hi.pop_front().or_else(|| self.lo.pop_front())
    }
}

/// Which intervals have something to sweep, globally and per stage.
#[derive(Debug)]
struct IntervalMasks {
    counts: Vec<[u32; NUM_INTERVALS as usize]>,
    global: u32,
    per_stage: Vec<u32>,
}

impl IntervalMasks {
    fn new(num_stages: usize) -> Self {
        Self {
            counts: vec![[0; NUM_INTERVALS as usize]; num_stages],
            global: 0,
            per_stage: vec![0; num_stages],
        }
    }

    fn update(&mut self, stage: usize, from: Option<u8>, to: Option<u8>) {
        let Some(counts) = self.counts.get_mut(stage) else {
            return;
        };
        if let Some(i) = from {
            counts[usize::from(i)] = counts[usize::from(i)].saturating_sub(1);
        }
        if let Some(i) = to {
            counts[usize::from(i)] += 1;
        }
        self.per_stage[stage] = counts
            .iter()
            .enumerate()
            .filter(|(_, n)| **n > 0)
            .fold(0, |mask, (i, _)| mask | (1 << i));
        self.global = self.per_stage.iter().fold(0, |mask, m| mask | m);
    }
}

pub struct RmtSweeper {
    config: Arc<ModelConfig>,
    handler: Arc<dyn SweepHandler>,
    tables: Mutex<HashMap<TableKey, Arc<TableInfo>>>,
    ops: Mutex<OpQueues>,
    masks: Mutex<IntervalMasks>,
    notifications: Mutex<Vec<Notification>>,
    ticks: AtomicU64,
}

impl std::fmt::Debug for RmtSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmtSweeper")
            .field("ticks", &self.ticks.load(Ordering::Relaxed))
            .field("tables", &self.tables.lock().len())
            .finish_non_exhaustive()
    }
}

/// Ticks between two sweeps of `interval`.
#[must_use]
pub const fn interval_to_ticks(interval: u8) -> u64 {
    1 << (interval % NUM_INTERVALS)
}

impl RmtSweeper {
    pub fn new(config: Arc<ModelConfig>, handler: Arc<dyn SweepHandler>) -> Self {
        let masks = IntervalMasks::new(config.num_stages);
        Self {
            config,
            handler,
            tables: Mutex::new(HashMap::new()),
            ops: Mutex::new(OpQueues::default()),
            masks: Mutex::new(masks),
            notifications: Mutex::new(Vec::new()),
            ticks: AtomicU64::new(0),
        }
    }

    /// Clock cycles between two sweeps of `interval`.
    #[must_use]
    pub fn interval_to_cycles(&self, interval: u8) -> u64 {
        interval_to_ticks(interval).saturating_mul(self.config.sweep_tick_cycles)
    }

    /// Picoseconds between two sweeps of `interval`.
    #[must_use]
    pub fn interval_to_psecs(&self, interval: u8) -> u64 {
        let cycles = u128::from(self.interval_to_cycles(interval));
        let psecs = cycles * 1_000_000 / u128::from(self.config.clock_mhz);
        u64::try_from(psecs).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Intervals swept in at least one stage.
    #[must_use]
    pub fn interval_mask(&self) -> u32 {
        self.masks.lock().global
    }

    #[must_use]
    pub fn stage_interval_mask(&self, stage: usize) -> u32 {
        self.masks.lock().per_stage.get(stage).copied().unwrap_or(0)
    }

    pub fn add_table(&self, key: TableKey) -> Result<Arc<TableInfo>, SweeperError> {
        let mut tables = self.tables.lock();
        if tables.contains_key(&key) {
            return Err(SweeperError::DuplicateTable(key));
        }
        let info = Arc::new(TableInfo::new(key));
        tables.insert(key, info.clone());
        debug!("sweeper tracks {key}");
        Ok(info)
    }

    pub fn table(&self, key: TableKey) -> Result<Arc<TableInfo>, SweeperError> {
        self.tables
            .lock()
            .get(&key)
            .cloned()
            .ok_or(SweeperError::UnknownTable(key))
    }

    /// Lock a table now, waiting for running ops to finish. Returns the new epoch.
    pub fn lock_table(&self, key: TableKey, addr_type: AddrType) -> Result<u8, SweeperError> {
        let info = self.table(key)?;
        let ctl = info.ctl(addr_type);
        let epoch = ctl.inc_lock();
        ctl.lock_wait();
        Ok(epoch)
    }

    pub fn unlock_table(&self, key: TableKey, addr_type: AddrType) -> Result<(), SweeperError> {
        let info = self.table(key)?;
        let ctl = info.ctl(addr_type);
        ctl.dec_lock();
        ctl.unlock_signal();
        Ok(())
    }

    /// Queue an op. High priority ops are all processed before any low priority one.
    pub fn queue_op(
        &self,
        key: TableKey,
        addr_type: AddrType,
        kind: OpKind,
        hi: bool,
    ) -> Result<(), SweeperError> {
        if let OpKind::IntervalSet(Some(i)) = kind
            && i >= NUM_INTERVALS
        {
            return Err(SweeperError::InvalidInterval(i));
        }
        let info = self.table(key)?;
        let op = Op::new(&info, addr_type, kind);
        let mut ops = self.ops.lock();
        if hi {
            ops.hi.push_back(op);
        } else {
            ops.lo.push_back(op);
        }
        Ok(())
    }

    /// Take everything reported so far.
    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.notifications.lock())
    }

    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }

    /// Process every queued op. Returns the number of ops processed.
    pub fn process_ops(&self) -> Result<usize, SweeperError> {
        let mut count = 0;
        loop {
            let Some(op) = self.ops.lock().pop() else {
                return Ok(count);
            };
            self.process_op(op)?;
            count += 1;
        }
    }

    fn process_op(&self, op: Op) -> Result<(), SweeperError> {
        let info = self.table(op.table)?;
        let ctl = info.ctl(op.addr_type);
        match op.kind {
            OpKind::Lock => {
                ctl.inc_lock();
                ctl.lock_wait();
                return Ok(());
            }
            OpKind::Unlock => {
                ctl.dec_lock();
                ctl.unlock_signal();
                return Ok(());
            }
            OpKind::Barrier(id) => {
                self.notify(Notification::Barrier(id));
                return Ok(());
            }
            _ => {}
        }
        if op.is_stale(ctl) {
            trace!(table = %op.table, "dropping stale {:?} (epoch {})", op.kind, op.epoch());
            return Ok(());
        }
        // Ops queued under a lock run inside it; the rest only run on an unlocked table.
        if op.epoch() == 0 {
            if ctl.is_locked_else_op_start() {
                trace!(table = %op.table, "table locked, dropping {:?}", op.kind);
                return Ok(());
            }
        } else {
            ctl.op_start();
        }
        let result = self.run_op(&info, op);
        ctl.op_stop();
        result
    }

    fn run_op(&self, info: &TableInfo, op: Op) -> Result<(), SweeperError> {
        let table = op.table;
        match (op.kind, op.addr_type) {
            (OpKind::IntervalSet(interval), AddrType::Idle) => {
                let previous = info.interval();
                info.set_interval(interval);
                self.masks.lock().update(table.stage, previous, interval);
                debug!(table = %table, "idle interval {previous:?} -> {interval:?}");
            }
            (OpKind::Sweep, AddrType::Idle) => self.age(table)?,
            (OpKind::Dump, AddrType::Idle) => {
                let entries = self.handler.dump_idle(table)?;
                self.notify(Notification::IdleDump { table, entries });
            }
            (OpKind::Dump, AddrType::Stats) => {
                let entries = self.handler.dump_stats(table, None)?;
                self.notify(Notification::Stats { table, entries });
            }
            (OpKind::DumpWord(word), AddrType::Stats) => {
                let entries = self.handler.dump_stats(table, Some(word))?;
                self.notify(Notification::Stats { table, entries });
            }
            (OpKind::EvictWord(word), AddrType::Stats) => {
                let entries = self.handler.evict_stats(table, word)?;
                self.notify(Notification::Stats { table, entries });
            }
            (kind, addr_type) => {
                warn!(table = %table, "{kind:?} does not apply to {addr_type:?} state");
            }
        }
        Ok(())
    }

    fn age(&self, table: TableKey) -> Result<(), SweeperError> {
        let entries = self.handler.age_idle(table)?;
        if !entries.is_empty() {
            self.notify(Notification::Idle { table, entries });
        }
        Ok(())
    }

    /// Advance logical time by one tick: process queued ops, age the idle tables whose
    /// interval is due and run the per stage upkeep.
    pub fn tick(&self) -> Result<(), SweeperError> {
        let t = self.ticks.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        self.process_ops()?;

        let due = (0..NUM_INTERVALS)
            .filter(|i| t % interval_to_ticks(*i) == 0)
            .fold(0u32, |mask, i| mask | (1 << i))
            & self.interval_mask();
        if due != 0 {
            let mut tables: Vec<_> = self.tables.lock().values().cloned().collect();
            tables.sort_unstable_by_key(|info| info.key());
            for info in tables {
                let key = info.key();
                if self.stage_interval_mask(key.stage) & due == 0 {
                    continue;
                }
                let Some(interval) = info.interval() else {
                    continue;
                };
                if due & (1 << interval) == 0 {
                    continue;
                }
                let ctl = info.ctl(AddrType::Idle);
                if ctl.is_locked_else_op_start() {
                    trace!(table = %key, "locked, skipping idle sweep");
                    continue;
                }
                let result = self.age(key);
                ctl.op_stop();
                result?;
            }
        }

        let cycles = t.saturating_mul(self.config.sweep_tick_cycles);
        for pipe in 0..self.config.num_pipes {
            for stage in 0..self.config.num_stages {
                for (alu, entry) in self.handler.sweep_stage(pipe, stage, cycles)? {
                    self.notify(Notification::Evicted { pipe, stage, alu, entry });
                }
            }
        }
        Ok(())
    }

    /// Tick every `period` on a background thread until the returned timer is stopped.
    pub fn start_timer(self: &Arc<Self>, period: Duration) -> Result<SweepTimer, SweeperError> {
        let run = Arc::new(AtomicBool::new(true));
        let handle = {
            let sweeper = self.clone();
            let run = run.clone();
            std::thread::Builder::new()
                .name("rmt-sweeper".to_string())
                .spawn(move || {
                    info!("sweeper timer started, period {period:?}");
                    while run.load(Ordering::Acquire) {
                        std::thread::sleep(period);
                        if let Err(e) = sweeper.tick() {
                            error!("sweep failed: {e}");
                        }
                    }
                    info!("sweeper timer stopped");
                })
                .map_err(|e| SweeperError::Timer(e.to_string()))?
        };
        Ok(SweepTimer {
            run,
            handle: Some(handle),
        })
    }
}

/// Background ticking of a sweeper. Stops when dropped.
#[derive(Debug)]
pub struct SweepTimer {
    run: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SweepTimer {
    pub fn stop(&mut self) {
        self.run.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("sweeper timer thread panicked");
        }
    }
}

impl Drop for SweepTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::ModelConfigBuilder;
    use mau::{StatsAddr, StatsOp};
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    /// Counts calls and hands out canned answers.
    #[derive(Default)]
    struct FakeHandler {
        aged: Mutex<Vec<TableKey>>,
        stage_sweeps: AtomicU64,
        last_cycles: AtomicU64,
    }

    fn entry(word: u32, pkts: u64) -> StatsEntry {
        StatsEntry {
            addr: StatsAddr::new(StatsOp::Stats, word, 0, true),
            pkts,
            bytes: pkts * 64,
        }
    }

    impl SweepHandler for FakeHandler {
        fn age_idle(&self, table: TableKey) -> Result<Vec<u32>, SweeperError> {
            self.aged.lock().push(table);
            Ok(vec![u32::try_from(table.lt).expect("small lt")])
        }
        fn dump_idle(&self, _table: TableKey) -> Result<Vec<(u32, u8)>, SweeperError> {
            Ok(vec![(1, 3)])
        }
        fn dump_stats(
            &self,
            _table: TableKey,
            word: Option<u32>,
        ) -> Result<Vec<StatsEntry>, SweeperError> {
            Ok(vec![entry(word.unwrap_or(0), 5)])
        }
        fn evict_stats(
            &self,
            _table: TableKey,
            word: u32,
        ) -> Result<Vec<StatsEntry>, SweeperError> {
            Ok(vec![entry(word, 7)])
        }
        fn sweep_stage(
            &self,
            _pipe: usize,
            _stage: usize,
            cycles: u64,
        ) -> Result<Vec<(usize, StatsEntry)>, SweeperError> {
            self.stage_sweeps.fetch_add(1, Ordering::Relaxed);
            self.last_cycles.store(cycles, Ordering::Relaxed);
            Ok(Vec::new())
        }
    }

    fn sweeper() -> (Arc<RmtSweeper>, Arc<FakeHandler>) {
        let config = ModelConfigBuilder::default()
            .num_pipes(1)
            .num_stages(2)
            .sweep_tick_cycles(100)
            .clock_mhz(1000)
            .build()
            .expect("valid config");
        let handler = Arc::new(FakeHandler::default());
        (Arc::new(RmtSweeper::new(Arc::new(config), handler.clone())), handler)
    }

    #[test]
    fn interval_conversions() {
        let (sweeper, _) = sweeper();
        assert_eq!(interval_to_ticks(0), 1);
        assert_eq!(interval_to_ticks(5), 32);
        assert_eq!(sweeper.interval_to_cycles(3), 800);
        // 800 cycles at 1 GHz
        assert_eq!(sweeper.interval_to_psecs(3), 800_000);
    }

    #[test]
    fn interval_masks_follow_tables() {
        let (sweeper, _) = sweeper();
        let a = TableKey::new(0, 0, 1);
        let b = TableKey::new(0, 1, 2);
        sweeper.add_table(a).expect("new table");
        sweeper.add_table(b).expect("new table");
        assert_eq!(sweeper.add_table(a).map(|_| ()), Err(SweeperError::DuplicateTable(a)));
        sweeper.queue_op(a, AddrType::Idle, OpKind::IntervalSet(Some(2)), false).expect("queued");
        sweeper.queue_op(b, AddrType::Idle, OpKind::IntervalSet(Some(2)), false).expect("queued");
        sweeper.process_ops().expect("processed");
        assert_eq!(sweeper.interval_mask(), 1 << 2);
        assert_eq!(sweeper.stage_interval_mask(1), 1 << 2);
        sweeper.queue_op(b, AddrType::Idle, OpKind::IntervalSet(Some(4)), false).expect("queued");
        sweeper.process_ops().expect("processed");
        assert_eq!(sweeper.interval_mask(), (1 << 2) | (1 << 4));
        assert_eq!(sweeper.stage_interval_mask(0), 1 << 2);
        sweeper.queue_op(a, AddrType::Idle, OpKind::IntervalSet(None), false).expect("queued");
        sweeper.process_ops().expect("processed");
        assert_eq!(sweeper.interval_mask(), 1 << 4);
        assert_eq!(
            sweeper.queue_op(a, AddrType::Idle, OpKind::IntervalSet(Some(40)), false),
            Err(SweeperError::InvalidInterval(40))
        );
    }

    #[test]
    fn ticks_age_due_tables() {
        let (sweeper, handler) = sweeper();
        let key = TableKey::new(0, 1, 3);
        sweeper.add_table(key).expect("new table");
        sweeper.queue_op(key, AddrType::Idle, OpKind::IntervalSet(Some(1)), false).expect("queued");
        for _ in 0..4 {
            sweeper.tick().expect("tick");
        }
        // interval 1 is due on ticks 2 and 4
        assert_eq!(*handler.aged.lock(), vec![key, key]);
        assert_eq!(handler.stage_sweeps.load(Ordering::Relaxed), 8);
        assert_eq!(handler.last_cycles.load(Ordering::Relaxed), 400);
        assert_eq!(
            sweeper.take_notifications(),
            vec![
                Notification::Idle { table: key, entries: vec![3] },
                Notification::Idle { table: key, entries: vec![3] },
            ]
        );

        sweeper.lock_table(key, AddrType::Idle).expect("known table");
        sweeper.tick().expect("tick");
        sweeper.tick().expect("tick");
        assert_eq!(handler.aged.lock().len(), 2);
        sweeper.unlock_table(key, AddrType::Idle).expect("known table");
    }

    #[test]
    fn high_priority_ops_go_first() {
        let (sweeper, _) = sweeper();
        let key = TableKey::new(0, 0, 0);
        sweeper.add_table(key).expect("new table");
        sweeper.queue_op(key, AddrType::Stats, OpKind::Barrier(1), false).expect("queued");
        sweeper.queue_op(key, AddrType::Stats, OpKind::DumpWord(9), false).expect("queued");
        sweeper.queue_op(key, AddrType::Stats, OpKind::Barrier(2), true).expect("queued");
        sweeper.queue_op(key, AddrType::Stats, OpKind::EvictWord(4), true).expect("queued");
        assert_eq!(sweeper.process_ops(), Ok(4));
        assert_eq!(
            sweeper.take_notifications(),
            vec![
                Notification::Barrier(2),
                Notification::Stats {
                    table: key,
                    entries: vec![entry(4, 7)]
                },
                Notification::Barrier(1),
                Notification::Stats {
                    table: key,
                    entries: vec![entry(9, 5)]
                },
            ]
        );
    }

    #[test]
    #[traced_test]
    fn ops_from_an_old_lock_are_dropped() {
        let (sweeper, _) = sweeper();
        let key = TableKey::new(0, 0, 5);
        sweeper.add_table(key).expect("new table");
        sweeper.lock_table(key, AddrType::Stats).expect("known table");
        sweeper.queue_op(key, AddrType::Stats, OpKind::Dump, false).expect("queued");
        sweeper.unlock_table(key, AddrType::Stats).expect("known table");
        sweeper.lock_table(key, AddrType::Stats).expect("known table");
        sweeper.process_ops().expect("processed");
        assert!(sweeper.take_notifications().is_empty());
        assert!(logs_contain("dropping stale"));

        // queued and run under the same lock
        sweeper.queue_op(key, AddrType::Stats, OpKind::Dump, false).expect("queued");
        sweeper.process_ops().expect("processed");
        assert_eq!(sweeper.take_notifications().len(), 1);

        // queued unlocked, but the table got locked before it ran
        sweeper.unlock_table(key, AddrType::Stats).expect("known table");
        sweeper.queue_op(key, AddrType::Stats, OpKind::Dump, false).expect("queued");
        sweeper.lock_table(key, AddrType::Stats).expect("known table");
        sweeper.process_ops().expect("processed");
        assert!(sweeper.take_notifications().is_empty());
    }

    #[test]
    fn unknown_tables_are_rejected() {
        let (sweeper, _) = sweeper();
        let key = TableKey::new(0, 0, 9);
        assert_eq!(
            sweeper.queue_op(key, AddrType::Idle, OpKind::Sweep, false),
            Err(SweeperError::UnknownTable(key))
        );
        assert_eq!(
            sweeper.lock_table(key, AddrType::Idle),
            Err(SweeperError::UnknownTable(key))
        );
    }

    #[test]
    fn timer_ticks_in_background() {
        let (sweeper, handler) = sweeper();
        let mut timer = sweeper
            .start_timer(Duration::from_millis(1))
            .expect("timer starts");
        while sweeper.ticks() < 3 {
            std::thread::sleep(Duration::from_millis(1));
        }
        timer.stop();
        let ticks = sweeper.ticks();
        assert!(handler.stage_sweeps.load(Ordering::Relaxed) >= 2 * 3);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(sweeper.ticks(), ticks);
    }
}
