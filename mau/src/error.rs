// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Errors raised by the MAU

use config::Chip;
use phv::PhvError;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MauError {
    #[error("row {row} {bus}: column {col} overrides a lower priority group write")]
    BusPriorityOverride { row: usize, bus: String, col: usize },
    #[error("invalid SRAM/VPN configuration: {0}")]
    SramVpn(String),
    #[error("stats format pkt={pkt} byte={byte} entries={entries} subword={subword} is invalid")]
    InvalidStatsFormat {
        pkt: bool,
        byte: bool,
        entries: u8,
        subword: u8,
    },
    #[error("tEOP bus {bus} already carries a {kind} address from stage {stage} table {lt}")]
    TeopBusCollision {
        bus: usize,
        kind: &'static str,
        stage: usize,
        lt: usize,
    },
    #[error("tEOP bus {bus} delay is {configured}, {required} required")]
    TeopDelayMismatch {
        bus: usize,
        configured: u64,
        required: u64,
    },
    #[error("stateful ALU {alu}: divide/modulo output selected with the divider disabled")]
    DivideDisabled { alu: usize },
    #[error("stateful ALU {alu}: carry op without a low half add/sub in the same cycle")]
    CarryWithoutAdd { alu: usize },
    #[error("selector ALU {alu}: {counted} live members counted, {expected} recorded")]
    SelectorLiveMismatch {
        alu: usize,
        counted: u32,
        expected: u32,
    },
    #[error("snapshot configuration: {0}")]
    Snapshot(String),
    #[error("{feature} is not available on {chip}")]
    Unsupported { feature: &'static str, chip: Chip },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Phv(#[from] PhvError),
}

/// Report a violated configuration check. When `relax` is set the violation is logged and
/// processing continues; otherwise the error is returned.
pub(crate) fn relaxable(relax: bool, err: MauError) -> Result<(), MauError> {
    if relax {
        warn!("{err} (check relaxed)");
        Ok(())
    } else {
        error!("{err}");
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn relaxed_checks_only_log() {
        let err = MauError::CarryWithoutAdd { alu: 2 };
        assert_eq!(relaxable(true, err), Ok(()));
        assert!(logs_contain("check relaxed"));
        let err = MauError::CarryWithoutAdd { alu: 2 };
        assert_eq!(relaxable(false, err), Err(MauError::CarryWithoutAdd { alu: 2 }));
    }
}
