// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet coordinator.
//!
//! Packets enter through [`RmtPacketCoordinator::enqueue`], are parsed into a PHV, run through
//! the MAU stages of the ingress pipe, handed by the traffic manager to the egress pipe owning
//! their egress port and finally leave through the transmit callback.

#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::module_name_repetitions
)]

mod coordinator;
mod error;
mod packet;
mod parser;
mod pipe;
mod queues;
mod tm;

pub use coordinator::{IdlePredicate, PcieRxFn, RmtPacketCoordinator, TxFn};
pub use error::CoordinatorError;
pub use packet::{
    Packet, make_port, pipe_of_port, port_is_valid, port_local, port_map_outbound, port_pipe,
};
pub use parser::{
    DROP_WORD, Deparsed, Deparser, EGRESS_PORT_WORD, ETHERTYPE_WORD, Extract, FieldLoc,
    INGRESS_PORT_WORD, IP_DST_WORD, IP_PROTO_WORD, IP_SRC_WORD, L4_DST_PORT_WORD, L4_SRC_PORT_WORD,
    MIRROR_PORT_WORD, Parsed, Parser, ParserState, RESUBMIT_WORD, Shift, Transition,
};
pub use pipe::{Pipe, Pipes};
pub use queues::{PerPipeQueues, PipeClaim, PipeStats};
pub use tm::{IngressOutput, TmAction, TrafficManager};
