// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Traffic manager: hands the output of an ingress pipe to the egress pipe owning its port.

use crate::packet::{Packet, pipe_of_port};
use config::ModelConfig;
use std::sync::Arc;
use tracing::{debug, warn};

/// What ingress processing produced for one packet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngressOutput {
    /// The packet, with its port set to the egress port.
    pub forward: Option<Packet>,
    /// A copy to send to the mirror port.
    pub mirror: Option<Packet>,
    /// The packet to run through ingress once more.
    pub resubmit: Option<Packet>,
}

/// Where the traffic manager sends a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TmAction {
    ToPipe(usize, Packet),
    Resubmit(Packet),
}

#[derive(Clone, Debug)]
pub struct TrafficManager {
    config: Arc<ModelConfig>,
}

impl TrafficManager {
    #[must_use]
    pub fn new(config: Arc<ModelConfig>) -> Self {
        Self { config }
    }

    /// Egress pipe of `port`, if the port exists and its pipe is modeled.
    #[must_use]
    pub fn egress_pipe(&self, port: u16) -> Option<usize> {
        pipe_of_port(&self.config, port)
    }

    #[must_use]
    pub fn route(&self, output: IngressOutput) -> Vec<TmAction> {
        let mut actions = Vec::new();
        if let Some(pkt) = output.resubmit {
            actions.push(TmAction::Resubmit(pkt));
        }
        for pkt in [output.forward, output.mirror].into_iter().flatten() {
            match self.egress_pipe(pkt.port) {
                Some(pipe) => {
                    debug!(pipe, port = pkt.port, "to egress");
                    actions.push(TmAction::ToPipe(pipe, pkt));
                }
                None => warn!(port = pkt.port, "no egress pipe for port, dropping"),
            }
        }
        actions
    }
}
