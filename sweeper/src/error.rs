// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Sweeper errors

use crate::TableKey;
use mau::MauError;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SweeperError {
    #[error("no table {0} is registered with the sweeper")]
    UnknownTable(TableKey),
    #[error("table {0} is already registered")]
    DuplicateTable(TableKey),
    #[error("interval code {0} is out of range (0..=31)")]
    InvalidInterval(u8),
    #[error("sweeper timer: {0}")]
    Timer(String),
    #[error(transparent)]
    Mau(#[from] MauError),
}
