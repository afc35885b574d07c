// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Background table maintenance.
//!
//! The [`RmtSweeper`] ages idle-time tables on their configured intervals, dumps and evicts
//! stats, and drains the long running timer evictions of every stage. Configuration changes
//! and sweeper work on the same table are serialized per table by [`TableOpCtl`]: a lock count
//! with an epoch, and a count of running operations.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod error;
mod sweeper;
mod table;

pub use error::SweeperError;
pub use sweeper::{
    NUM_INTERVALS, Notification, RmtSweeper, SweepHandler, SweepTimer, interval_to_ticks,
};
pub use table::{AddrType, Op, OpKind, TableInfo, TableKey, TableOpCtl};
