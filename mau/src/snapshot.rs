// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Snapshot: per stage, per gress debug capture of a packet's PHV and match results.
//!
//! ```text
//!   arm()          match / timestamp        finalize_snapshot()
//! Passive ----> Armed ------------> (capturing) --------------> Full
//!                 TriggerHappy: also captures on an upstream trigger
//! ```
//!
//! A stage that captures, or any stage that sees an upstream trigger in Passive or
//! TriggerHappy, passes the trigger on to the next stage. Armed and Full stages do not.
//! Full is sticky until `reset()`.

use crate::error::{MauError, relaxable};
use phv::{Gress, Phv};
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
pub enum SnapshotState {
    #[default]
    Passive,
    Armed,
    TriggerHappy,
    Full,
}

/// PHV word match. The word matches unless a bit has stored 0 / PHV 1 under `s0q1` or
/// stored 1 / PHV 0 under `s1q0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotMatchWord {
    pub phv_index: usize,
    pub value: u32,
    pub s0q1: u32,
    pub s1q0: u32,
}

impl SnapshotMatchWord {
    /// Match `value` exactly on the bits of `mask`.
    #[must_use]
    pub fn exact(phv_index: usize, value: u32, mask: u32) -> Self {
        Self {
            phv_index,
            value,
            s0q1: mask,
            s1q0: mask,
        }
    }

    fn matches(&self, word: u32) -> bool {
        if self.s0q1 == 0 && self.s1q0 == 0 {
            return false;
        }
        (!self.value & word & self.s0q1) | (self.value & !word & self.s1q0) == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotConfig {
    pub match_words: Vec<SnapshotMatchWord>,
    /// Trigger once the snapshot clock reaches this value.
    pub timestamp_trigger: Option<u64>,
    /// PHV words recorded on capture.
    pub capture_words: Vec<usize>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DatapathCapture {
    pub pkt_version: u8,
    /// Bit per gress with a packet in the stage.
    pub thread_active: u8,
    pub ghost: bool,
}

/// Everything a full snapshot holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotCapture {
    pub datapath: DatapathCapture,
    pub captured_words: Vec<(usize, u32)>,
    pub next_table: Option<u16>,
    /// Hit addresses of the physical match buses.
    pub physical_bus_hits: Vec<u32>,
    pub lt_hit: u16,
    pub lt_inhibit: u16,
    pub phv: Phv,
}

/// Per packet results handed over when a snapshot completes.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotResults<'a> {
    pub next_table: Option<u16>,
    pub physical_bus_hits: &'a [u32],
    pub lt_hit: u16,
    pub lt_inhibit: u16,
}

#[derive(Debug)]
pub struct MauSnapshot {
    stage: usize,
    gress: Gress,
    config: SnapshotConfig,
    state: SnapshotState,
    time: u64,
    pending: Option<DatapathCapture>,
    capture: Option<SnapshotCapture>,
    interrupts: u32,
}

impl MauSnapshot {
    /// Dark PHV words cannot be matched and are dropped from the match list. Words outside the
    /// PHV are a configuration error.
    pub fn new(
        stage: usize,
        gress: Gress,
        mut config: SnapshotConfig,
        layout: phv::PhvLayout,
        relax_snapshot_check: bool,
    ) -> Result<Self, MauError> {
        for w in &config.match_words {
            if layout.class(w.phv_index).is_none() {
                relaxable(
                    relax_snapshot_check,
                    MauError::Snapshot(format!(
                        "stage {stage} {gress}: cannot match PHV word {}",
                        w.phv_index
                    )),
                )?;
            }
        }
        for &w in &config.capture_words {
            if layout.class(w).is_none() {
                relaxable(
                    relax_snapshot_check,
                    MauError::Snapshot(format!(
                        "stage {stage} {gress}: cannot capture PHV word {w}"
                    )),
                )?;
            }
        }
        config
            .match_words
            .retain(|w| layout.class(w.phv_index).is_some() && !layout.is_dark(w.phv_index));
        Ok(Self {
            stage,
            gress,
            config,
            state: SnapshotState::Passive,
            time: 0,
            pending: None,
            capture: None,
            interrupts: 0,
        })
    }

    #[must_use]
    pub fn state(&self) -> SnapshotState {
        self.state
    }

    pub fn arm(&mut self) {
        self.set_state(SnapshotState::Armed);
    }

    /// Arm and also capture on a trigger from an upstream stage.
    pub fn arm_trigger_happy(&mut self) {
        self.set_state(SnapshotState::TriggerHappy);
    }

    pub fn reset(&mut self) {
        self.set_state(SnapshotState::Passive);
        self.pending = None;
        self.capture = None;
    }

    fn set_state(&mut self, state: SnapshotState) {
        debug!(stage = self.stage, gress = %self.gress, "snapshot {} -> {state}", self.state);
        self.state = state;
    }

    #[must_use]
    pub fn capture(&self) -> Option<&SnapshotCapture> {
        self.capture.as_ref()
    }

    #[must_use]
    pub fn interrupts(&self) -> u32 {
        self.interrupts
    }

    #[must_use]
    pub fn time(&self) -> u64 {
        self.time
    }

    /// Advance the snapshot clock. It never goes backwards.
    pub fn advance_time(&mut self, global: u64, phv_relative: u64, last_nop: u64) {
        self.time = self.time.max(global).max(phv_relative).max(last_nop);
    }

    #[must_use]
    pub fn phv_matches(&self, phv: &Phv) -> bool {
        !self.config.match_words.is_empty()
            && self
                .config
                .match_words
                .iter()
                .all(|w| w.matches(phv.get(w.phv_index)))
    }

    fn timestamp_triggered(&self) -> bool {
        self.config.timestamp_trigger.is_some_and(|t| self.time >= t)
    }

    /// Check for a trigger on `phv` and record the datapath capture when one fires. Returns the
    /// trigger passed to the next stage.
    pub fn maybe_capture(&mut self, phv: &Phv, triggered_in: bool) -> bool {
        let own = || self.phv_matches(phv) || self.timestamp_triggered();
        let capture = match self.state {
            SnapshotState::Passive | SnapshotState::Full => false,
            SnapshotState::Armed => own(),
            SnapshotState::TriggerHappy => triggered_in || own(),
        };
        if capture {
            self.pending = Some(DatapathCapture {
                pkt_version: phv.version(),
                thread_active: 1 << self.gress.index(),
                ghost: phv.ghost(),
            });
        }
        let forward = matches!(self.state, SnapshotState::Passive | SnapshotState::TriggerHappy);
        capture || (triggered_in && forward)
    }

    /// Complete a capture started by `maybe_capture`, moving to Full and raising the interrupt.
    pub fn finalize_snapshot(&mut self, phv: &Phv, results: SnapshotResults<'_>) -> bool {
        let Some(datapath) = self.pending.take() else {
            return false;
        };
        self.capture = Some(SnapshotCapture {
            datapath,
            captured_words: self
                .config
                .capture_words
                .iter()
                .map(|&w| (w, phv.get(w)))
                .collect(),
            next_table: results.next_table,
            physical_bus_hits: results.physical_bus_hits.to_vec(),
            lt_hit: results.lt_hit,
            lt_inhibit: results.lt_inhibit,
            phv: phv.clone(),
        });
        self.set_state(SnapshotState::Full);
        self.interrupts += 1;
        info!(stage = self.stage, gress = %self.gress, "snapshot captured");
        true
    }
}
