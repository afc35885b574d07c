// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Match-action unit.
//!
//! A [`MauStage`] owns the resources of one pipeline stage: the input crossbar and hash groups,
//! SRAM rows and TCAMs, the stats, stateful and selector ALUs, the JBay stateful counters, the
//! snapshot logic and the tEOP bus registers. Everything is addressed by index; nothing in a
//! stage points at anything else.
//!
//! None of these types is synchronized. A pipe, and every stage in it, is only ever touched by
//! the one worker thread that currently owns the pipe. The stateful counters are the exception:
//! they are shared with the sweeper and carry their own lock.

#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::unreadable_literal
)]

pub mod address;
pub mod chip_salu;
pub mod error;
pub mod gateway;
pub mod hash;
pub mod idle;
pub mod io;
pub mod logical_table;
pub mod selector_alu;
pub mod snapshot;
pub mod sram;
pub mod sram_row;
pub mod stage;
pub mod stateful_alu;
pub mod stateful_counters;
pub mod stats_alu;
pub mod tcam;
pub mod teop;

pub use address::{AddrFormat, MeterAddr, MeterOp, StatsAddr, StatsOp};
pub use error::MauError;
pub use io::{MauIo, table_id};
pub use stage::{MauStage, StageResults};
