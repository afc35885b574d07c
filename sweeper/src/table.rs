// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per table lock and run bookkeeping, and the operations queued against tables.

use parking_lot::{Condvar, Mutex};
use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::trace;

/// Interval value of a table that is not swept.
const NO_INTERVAL: u8 = 0xFF;

/// Identifies a logical table of a stage of a pipe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableKey {
    pub pipe: usize,
    pub stage: usize,
    pub lt: usize,
}

impl TableKey {
    #[must_use]
    pub const fn new(pipe: usize, stage: usize, lt: usize) -> Self {
        Self { pipe, stage, lt }
    }
}

impl Display for TableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pipe {} stage {} lt {}", self.pipe, self.stage, self.lt)
    }
}

/// The kind of table state an operation works on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddrType {
    Idle,
    Stats,
}

#[derive(Debug, Default)]
struct OpState {
    locks: u32,
    /// Epoch of the current locked interval, 0 while unlocked.
    epoch: u8,
    /// Epoch of the most recent locked interval.
    last_epoch: u8,
    running: u32,
}

/// Lock count with epoch, and a count of operations running against a table.
///
/// A lock taken on an unlocked table starts a new epoch; epochs count 1 to 255 and wrap back
/// to 1, 0 meaning unlocked. An [`Op`] remembers the epoch it was queued under, so an op
/// queued before an unlock or relock can be told apart from the current one.
#[derive(Debug, Default)]
pub struct TableOpCtl {
    state: Mutex<OpState>,
    cv: Condvar,
}

const fn next_epoch(epoch: u8) -> u8 {
    if epoch == u8::MAX { 1 } else { epoch + 1 }
}

impl TableOpCtl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a lock. Returns the epoch of the locked interval.
    pub fn inc_lock(&self) -> u8 {
        let mut state = self.state.lock();
        state.locks += 1;
        if state.locks == 1 {
            state.epoch = next_epoch(state.last_epoch);
            state.last_epoch = state.epoch;
            trace!("locked, epoch {}", state.epoch);
        }
        state.epoch
    }

    /// Release a lock. Releasing an unlocked table does nothing.
    pub fn dec_lock(&self) {
        let mut state = self.state.lock();
        if state.locks == 0 {
            return;
        }
        state.locks -= 1;
        if state.locks == 0 {
            trace!("unlocked after epoch {}", state.epoch);
            state.epoch = 0;
        }
    }

    #[must_use]
    pub fn epoch(&self) -> u8 {
        self.state.lock().epoch
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.lock().locks > 0
    }

    #[must_use]
    pub fn running(&self) -> u32 {
        self.state.lock().running
    }

    /// Block until no operation runs against the table.
    pub fn lock_wait(&self) {
        let mut state = self.state.lock();
        while state.running > 0 {
            self.cv.wait(&mut state);
        }
    }

    /// Wake everything waiting on the table.
    pub fn unlock_signal(&self) {
        self.cv.notify_all();
    }

    pub fn op_start(&self) {
        self.state.lock().running += 1;
    }

    pub fn op_stop(&self) {
        let mut state = self.state.lock();
        state.running = state.running.saturating_sub(1);
        drop(state);
        self.cv.notify_all();
    }

    /// Returns true if the table is locked. Otherwise starts an operation (which must be
    /// ended with [`TableOpCtl::op_stop`]) and returns false, atomically.
    pub fn is_locked_else_op_start(&self) -> bool {
        let mut state = self.state.lock();
        if state.locks > 0 {
            return true;
        }
        state.running += 1;
        false
    }
}

/// Sweeper view of one logical table.
#[derive(Debug)]
pub struct TableInfo {
    key: TableKey,
    interval: AtomicU8,
    idle: TableOpCtl,
    stats: TableOpCtl,
}

impl TableInfo {
    #[must_use]
    pub fn new(key: TableKey) -> Self {
        Self {
            key,
            interval: AtomicU8::new(NO_INTERVAL),
            idle: TableOpCtl::new(),
            stats: TableOpCtl::new(),
        }
    }

    #[must_use]
    pub fn key(&self) -> TableKey {
        self.key
    }

    /// Idle sweep interval code, if the table is swept.
    #[must_use]
    pub fn interval(&self) -> Option<u8> {
        match self.interval.load(Ordering::Relaxed) {
            NO_INTERVAL => None,
            i => Some(i),
        }
    }

    pub(crate) fn set_interval(&self, interval: Option<u8>) {
        self.interval
            .store(interval.unwrap_or(NO_INTERVAL), Ordering::Relaxed);
    }

    #[must_use]
    pub fn ctl(&self, addr_type: AddrType) -> &TableOpCtl {
        match addr_type {
            AddrType::Idle => &self.idle,
            AddrType::Stats => &self.stats,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// Set (or with `None`, stop) the idle sweep interval.
    IntervalSet(Option<u8>),
    Lock,
    Unlock,
    /// Age the idle counters once, outside of the interval schedule.
    Sweep,
    /// Report every entry.
    Dump,
    /// Report the entries of one RAM word.
    DumpWord(u32),
    /// Report the entries of one RAM word and clear them.
    EvictWord(u32),
    /// Report back once every earlier op is done.
    Barrier(u64),
}

/// An operation queued against a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Op {
    pub table: TableKey,
    pub addr_type: AddrType,
    pub kind: OpKind,
    epoch: u8,
}

impl Op {
    /// Create an op, capturing the current lock epoch of its table.
    #[must_use]
    pub fn new(info: &TableInfo, addr_type: AddrType, kind: OpKind) -> Self {
        Self {
            table: info.key(),
            addr_type,
            kind,
            epoch: info.ctl(addr_type).epoch(),
        }
    }

    #[must_use]
    pub fn epoch(&self) -> u8 {
        self.epoch
    }

    /// Whether the table was unlocked or relocked since the op was queued.
    #[must_use]
    pub fn is_stale(&self, ctl: &TableOpCtl) -> bool {
        self.epoch != ctl.epoch()
    }
}
