// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Idle time tracking: a 2-bit counter per table entry, reloaded on hit and aged by the sweeper.

use hashbrown::HashMap;
use tracing::debug;

/// Value of a freshly hit entry.
pub const IDLE_MAX: u8 = 3;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdleTable {
    lt: usize,
    /// Sweep interval code of the table.
    interval: u8,
    counters: HashMap<u32, u8>,
}

impl IdleTable {
    #[must_use]
    pub fn new(lt: usize, interval: u8) -> Self {
        Self {
            lt,
            interval: interval & 0x1F,
            counters: HashMap::new(),
        }
    }

    #[must_use]
    pub fn interval(&self) -> u8 {
        self.interval
    }

    /// Start tracking the entry at `index`.
    pub fn activate(&mut self, index: u32) {
        self.counters.insert(index, IDLE_MAX);
    }

    pub fn remove(&mut self, index: u32) {
        self.counters.remove(&index);
    }

    /// Reload the counter of a tracked entry.
    pub fn hit(&mut self, index: u32) {
        if let Some(c) = self.counters.get_mut(&index) {
            *c = IDLE_MAX;
        }
    }

    #[must_use]
    pub fn counter(&self, index: u32) -> Option<u8> {
        self.counters.get(&index).copied()
    }

    /// Tracked entries and their counters, sorted by index.
    #[must_use]
    pub fn entries(&self) -> Vec<(u32, u8)> {
        let mut entries: Vec<_> = self.counters.iter().map(|(i, c)| (*i, *c)).collect();
        entries.sort_unstable();
        entries
    }

    /// Age every tracked entry by one. Returns the entries that just became idle, sorted.
    pub fn sweep(&mut self) -> Vec<u32> {
        let mut idle: Vec<u32> = self
            .counters
            .iter_mut()
            .filter(|(_, c)| **c > 0)
            .filter_map(|(index, c)| {
                *c -= 1;
                (*c == 0).then_some(*index)
            })
            .collect();
        idle.sort_unstable();
        if !idle.is_empty() {
            debug!(lt = self.lt, "{} entries idle", idle.len());
        }
        idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ages_to_idle_once() {
        let mut table = IdleTable::new(1, 4);
        table.activate(10);
        table.activate(20);
        assert!(table.sweep().is_empty());
        table.hit(20);
        assert!(table.sweep().is_empty());
        assert_eq!(table.sweep(), vec![10]);
        assert_eq!(table.sweep(), vec![20]);
        assert!(table.sweep().is_empty());
        assert_eq!(table.counter(10), Some(0));
        table.hit(10);
        assert_eq!(table.counter(10), Some(IDLE_MAX));
        table.hit(99);
        assert_eq!(table.counter(99), None);
        assert_eq!(table.entries(), vec![(10, IDLE_MAX), (20, 0)]);
    }
}
