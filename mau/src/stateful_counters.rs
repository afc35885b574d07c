// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Stateful counters (JBay).
//!
//! Each stage has four counters producing stateful addresses for the stateful ALUs. A counter
//! moves through the address space `[min, max]` of its VPN range in steps of the entry width,
//! either as a plain counter, a FIFO (separate push and pop pointers) or a stack.
//!
//! The counters are mutated from the packet path and from the sweeper, so their state sits
//! behind a lock.

use crate::error::MauError;
use bitflags::bitflags;
use parking_lot::Mutex;
use tracing::{debug, trace};

pub const NUM_COUNTERS: usize = 4;
/// Address bits below the VPN: 10 index bits and 7 bit offset bits.
pub const VPN_SHIFT: u32 = 17;
/// Largest VPN of a stateful address (6 bits).
pub const MAX_VPN: u32 = 0x3F;
/// Widest stateful entry, a full RAM word.
pub const MAX_ENTRY_BITS: u32 = 128;
/// Watermark thresholds are in units of this many operations.
pub const WATERMARK_UNIT_SHIFT: u32 = 7;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CounterFlags: u8 {
        const START_PENDING = 1 << 0;
        const RUNNING = 1 << 1;
        const OVERFLOWED = 1 << 2;
        const UNDERFLOWED = 1 << 3;
    }
}

impl CounterFlags {
    /// A clear is pending or running.
    #[must_use]
    pub fn active(self) -> bool {
        self.intersects(Self::START_PENDING | Self::RUNNING)
    }

    #[must_use]
    pub fn flagged(self) -> bool {
        !self.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CounterMode {
    #[default]
    Disabled,
    Counter,
    Fifo,
    Stack,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WatermarkMode {
    #[default]
    Push,
    Pop,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatermarkConfig {
    pub enable: bool,
    pub mode: WatermarkMode,
    /// In units of 128 operations.
    pub threshold: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterConfig {
    pub mode: CounterMode,
    pub vpn_base: u32,
    pub vpn_limit: u32,
    /// Bits per entry, the distance between successive addresses.
    pub entry_bits: u32,
    pub watermark: WatermarkConfig,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            mode: CounterMode::Disabled,
            vpn_base: 0,
            vpn_limit: 0,
            entry_bits: 128,
            watermark: WatermarkConfig::default(),
        }
    }
}

impl CounterConfig {
    /// Reject ranges the counter cannot walk: an inverted or out of range VPN window, or an
    /// entry width that is not a power of two up to a full word.
    pub fn validate(&self) -> Result<(), MauError> {
        if self.vpn_limit < self.vpn_base {
            return Err(MauError::InvalidConfig(format!(
                "stateful counter VPN limit {} below base {}",
                self.vpn_limit, self.vpn_base
            )));
        }
        if self.vpn_limit > MAX_VPN {
            return Err(MauError::InvalidConfig(format!(
                "stateful counter VPN limit {} exceeds {MAX_VPN}",
                self.vpn_limit
            )));
        }
        if !self.entry_bits.is_power_of_two() || self.entry_bits > MAX_ENTRY_BITS {
            return Err(MauError::InvalidConfig(format!(
                "stateful counter entry width {} is not a power of two up to {MAX_ENTRY_BITS}",
                self.entry_bits
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn step(&self) -> u32 {
        self.entry_bits.clamp(1, MAX_ENTRY_BITS)
    }

    #[must_use]
    pub fn min_value(&self) -> u32 {
        self.vpn_base.min(MAX_VPN) << VPN_SHIFT
    }

    #[must_use]
    pub fn max_value(&self) -> u32 {
        ((self.vpn_limit.min(MAX_VPN) + 1) << VPN_SHIFT) - 1
    }

    /// Last value a counter takes before wrapping to `min_value`.
    #[must_use]
    pub fn wrapped_max_value(&self) -> u32 {
        (self.max_value() + 1).saturating_sub(self.step())
    }

    /// Number of entries in the range, 0 for an inverted range.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        match self.max_value().checked_sub(self.min_value()) {
            Some(span) => (span + 1) / self.step(),
            None => 0,
        }
    }

    #[must_use]
    pub fn increment_with_wrap(&self, value: u32) -> u32 {
        if value >= self.wrapped_max_value() || value < self.min_value() {
            self.min_value()
        } else {
            value + self.step()
        }
    }

    #[must_use]
    pub fn decrement_with_wrap(&self, value: u32) -> u32 {
        if value <= self.min_value() || value > self.wrapped_max_value() {
            self.wrapped_max_value()
        } else {
            value - self.step()
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterState {
    /// Counter value, FIFO push pointer or stack pointer.
    pub value: u32,
    /// FIFO pop pointer.
    pub pop: u32,
    pub fill: u32,
    pub watermark: u32,
    pub watermark_events: u32,
    pub flags: CounterFlags,
    clear_start: u64,
    clear_done_till: u64,
    clear_next: u32,
    cleared: u32,
}

#[derive(Debug)]
pub struct MauStatefulCounters {
    configs: [CounterConfig; NUM_COUNTERS],
    synchronous_clear: bool,
    state: Mutex<[CounterState; NUM_COUNTERS]>,
}

impl MauStatefulCounters {
    #[must_use]
    pub fn new(configs: [CounterConfig; NUM_COUNTERS], synchronous_clear: bool) -> Self {
        let mut state = [CounterState::default(); NUM_COUNTERS];
        for (s, c) in state.iter_mut().zip(configs.iter()) {
            s.value = c.min_value();
            s.pop = c.min_value();
        }
        Self {
            configs,
            synchronous_clear,
            state: Mutex::new(state),
        }
    }

    #[must_use]
    pub fn config(&self, counter: usize) -> &CounterConfig {
        &self.configs[counter]
    }

    #[must_use]
    pub fn state(&self, counter: usize) -> CounterState {
        self.state.lock()[counter]
    }

    #[must_use]
    pub fn flags(&self, counter: usize) -> CounterFlags {
        self.state.lock()[counter].flags
    }

    fn watermark(cfg: &CounterConfig, st: &mut CounterState, mode: WatermarkMode) {
        if !cfg.watermark.enable || cfg.watermark.mode != mode {
            return;
        }
        st.watermark += 1;
        if st.watermark >= cfg.watermark.threshold << WATERMARK_UNIT_SHIFT {
            st.watermark = 0;
            st.watermark_events += 1;
            debug!(watermark_events = st.watermark_events, "watermark reached");
        }
    }

    /// Address for a push (or a plain count), advancing the counter. `None` when the counter
    /// is disabled, being cleared or full.
    pub fn push(&self, counter: usize) -> Option<u32> {
        let cfg = &self.configs[counter];
        let mut guard = self.state.lock();
        let st = &mut guard[counter];
        if st.flags.active() {
            return None;
        }
        let addr = match cfg.mode {
            CounterMode::Disabled => return None,
            CounterMode::Counter => {
                let addr = st.value;
                st.value = cfg.increment_with_wrap(st.value);
                return Some(addr);
            }
            _ if st.fill >= cfg.capacity() => {
                st.flags |= CounterFlags::OVERFLOWED;
                trace!(counter, "push overflow");
                return None;
            }
            CounterMode::Fifo | CounterMode::Stack => {
                let addr = st.value;
                st.value = cfg.increment_with_wrap(st.value);
                addr
            }
        };
        st.fill += 1;
        Self::watermark(cfg, st, WatermarkMode::Push);
        Some(addr)
    }

    /// Address for a pop. `None` when disabled, being cleared or empty.
    pub fn pop(&self, counter: usize) -> Option<u32> {
        let cfg = &self.configs[counter];
        let mut guard = self.state.lock();
        let st = &mut guard[counter];
        if st.flags.active() {
            return None;
        }
        let addr = match cfg.mode {
            CounterMode::Disabled => return None,
            CounterMode::Counter => {
                st.value = cfg.decrement_with_wrap(st.value);
                return Some(st.value);
            }
            _ if st.fill == 0 => {
                st.flags |= CounterFlags::UNDERFLOWED;
                trace!(counter, "pop underflow");
                return None;
            }
            CounterMode::Fifo => {
                let addr = st.pop;
                st.pop = cfg.increment_with_wrap(st.pop);
                addr
            }
            CounterMode::Stack => {
                st.value = cfg.decrement_with_wrap(st.value);
                st.value
            }
        };
        st.fill -= 1;
        Self::watermark(cfg, st, WatermarkMode::Pop);
        Some(addr)
    }

    fn reset(cfg: &CounterConfig, st: &mut CounterState) {
        *st = CounterState {
            value: cfg.min_value(),
            pop: cfg.min_value(),
            ..CounterState::default()
        };
    }

    /// Schedule a clear of `counter` starting at logical time `t`.
    pub fn start_clear_at(&self, counter: usize, t: u64) {
        let cfg = &self.configs[counter];
        let mut guard = self.state.lock();
        let st = &mut guard[counter];
        st.flags |= CounterFlags::START_PENDING;
        st.clear_start = t;
        st.clear_done_till = t;
        st.clear_next = cfg.min_value();
        st.cleared = 0;
        debug!(counter, t, "clear scheduled");
    }

    /// Advance a scheduled clear up to logical time `t_stop`, one entry per tick. Returns the
    /// addresses cleared by this slice. Completion resets pointers, fill level and flags.
    pub fn continue_clear_till(&self, counter: usize, t_stop: u64) -> Vec<u32> {
        let cfg = &self.configs[counter];
        let mut guard = self.state.lock();
        let st = &mut guard[counter];
        let mut cleared = Vec::new();
        if !st.flags.active() || t_stop < st.clear_start {
            return cleared;
        }
        if st.flags.contains(CounterFlags::START_PENDING) {
            st.flags.remove(CounterFlags::START_PENDING);
            st.flags.insert(CounterFlags::RUNNING);
        }
        let ticks = t_stop.saturating_sub(st.clear_done_till);
        let remaining = u64::from(cfg.capacity().saturating_sub(st.cleared));
        for _ in 0..ticks.min(remaining) {
            cleared.push(st.clear_next);
            st.clear_next = st.clear_next.wrapping_add(cfg.step());
            st.cleared += 1;
        }
        st.clear_done_till = t_stop;
        if st.cleared >= cfg.capacity() {
            Self::reset(cfg, st);
            debug!(counter, t_stop, "clear complete");
        }
        cleared
    }

    /// Clear `counter` at once when synchronous clearing is configured, returning every address
    /// of its range. Otherwise nothing happens and the caller schedules a timed clear.
    pub fn maybe_synchronous_clear(&self, counter: usize) -> Option<Vec<u32>> {
        if !self.synchronous_clear {
            return None;
        }
        let cfg = &self.configs[counter];
        let mut guard = self.state.lock();
        Self::reset(cfg, &mut guard[counter]);
        Some(
            (0..cfg.capacity())
                .map(|i| cfg.min_value() + i * cfg.step())
                .collect(),
        )
    }
}
