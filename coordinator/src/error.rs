// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Coordinator errors

use mau::MauError;
use phv::PhvError;
use sweeper::SweeperError;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CoordinatorError {
    #[error("port {0} does not exist")]
    InvalidPort(u16),
    #[error("pipe {0} does not exist")]
    InvalidPipe(usize),
    #[error("stage {stage} does not exist in pipe {pipe}")]
    InvalidStage { pipe: usize, stage: usize },
    #[error("the coordinator is not running")]
    NotRunning,
    #[error("the coordinator is already running")]
    AlreadyRunning,
    #[error("gave up waiting for the model to go idle")]
    IdleTimeout,
    #[error("failed to start worker thread: {0}")]
    Thread(String),
    #[error(transparent)]
    Mau(#[from] MauError),
    #[error(transparent)]
    Phv(#[from] PhvError),
    #[error(transparent)]
    Sweeper(#[from] SweeperError),
}
