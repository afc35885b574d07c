// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packets and port numbering.
//!
//! Internal port numbers carry the pipe in the bits above bit 7 and the pipe local port in the
//! low 7 bits. External port numbers count the ports of all pipes consecutively.

use config::ModelConfig;
use std::fmt::Display;

/// Internal port number of local port `local` of `pipe`.
#[must_use]
pub const fn make_port(pipe: usize, local: u16) -> u16 {
    ((pipe as u16) << 7) | (local & 0x7F)
}

#[must_use]
pub const fn port_pipe(port: u16) -> usize {
    (port >> 7) as usize
}

#[must_use]
pub const fn port_local(port: u16) -> u16 {
    port & 0x7F
}

/// External port number of an internal port.
#[must_use]
pub const fn port_map_outbound(port: u16) -> u16 {
    (port >> 7) * ModelConfig::PORTS_PER_PIPE + port_local(port)
}

/// Whether `port` is a port of the model: a local port of an existing pipe, or the PCIe port.
#[must_use]
pub fn port_is_valid(config: &ModelConfig, port: u16) -> bool {
    port == config.pcie_port
        || (port_pipe(port) < config.num_pipes && port_local(port) < ModelConfig::PORTS_PER_PIPE)
}

/// Pipe serving `port`, `None` for ports outside the model. The PCIe port sits on pipe 2, or
/// on the last pipe when fewer are modeled.
#[must_use]
pub fn pipe_of_port(config: &ModelConfig, port: u16) -> Option<usize> {
    if port == config.pcie_port {
        return Some(port_pipe(port).min(config.num_pipes.checked_sub(1)?));
    }
    port_is_valid(config, port).then_some(port_pipe(port))
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packet {
    /// Ingress port on the way in, egress port once the ingress pipeline chose one.
    pub port: u16,
    pub data: Vec<u8>,
    /// Set on a resubmitted packet; a packet is resubmitted at most once.
    pub resubmitted: bool,
}

impl Packet {
    #[must_use]
    pub fn new(port: u16, data: &[u8]) -> Self {
        Self {
            port,
            data: data.to_vec(),
            resubmitted: false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn pipe(&self) -> usize {
        port_pipe(self.port)
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port {} ({} bytes):", self.port, self.data.len())?;
        for byte in &self.data {
            write!(f, " {byte:02x}")?;
        }
        Ok(())
    }
}
