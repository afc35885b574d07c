// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A pipe: parsers, MAU stages and deparsers for both gresses.

use crate::error::CoordinatorError;
use crate::packet::Packet;
use crate::parser::{Deparsed, Deparser, Parser};
use crate::tm::IngressOutput;
use config::ModelConfig;
use mau::stats_alu::StatsEntry;
use mau::{MauIo, MauStage};
use parking_lot::{Mutex, MutexGuard};
use phv::Gress;
use std::sync::Arc;
use sweeper::{SweepHandler, SweeperError, TableKey};
use tracing::{debug, trace};

#[derive(Debug)]
pub struct Pipe {
    pipe: usize,
    config: Arc<ModelConfig>,
    stages: Vec<MauStage>,
    parsers: [Parser; 2],
    deparsers: [Deparser; 2],
    first_table: [Option<u16>; 2],
    /// Logical time in cycles, one per packet.
    time: u64,
}

/// The result of running one packet through a gress of a pipe.
struct Traversal {
    deparsed: Deparsed,
    error: bool,
}

impl Pipe {
    /// A pipe running the Ethernet/IPv4/L4 parser with no tables configured.
    pub fn new(pipe: usize, config: Arc<ModelConfig>) -> Result<Self, CoordinatorError> {
        let stages = (0..config.num_stages)
            .map(|s| MauStage::new(s, config.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let parser = Parser::ethernet_ipv4_l4(config.chip);
        Ok(Self {
            pipe,
            stages,
            parsers: [parser.clone(), parser],
            deparsers: [Deparser::ingress(), Deparser::egress()],
            first_table: [None; 2],
            time: 0,
            config,
        })
    }

    #[must_use]
    pub fn pipe(&self) -> usize {
        self.pipe
    }

    pub fn stage(&self, stage: usize) -> Result<&MauStage, CoordinatorError> {
        self.stages.get(stage).ok_or(CoordinatorError::InvalidStage {
            pipe: self.pipe,
            stage,
        })
    }

    pub fn stage_mut(&mut self, stage: usize) -> Result<&mut MauStage, CoordinatorError> {
        let pipe = self.pipe;
        self.stages
            .get_mut(stage)
            .ok_or(CoordinatorError::InvalidStage { pipe, stage })
    }

    pub fn set_parser(&mut self, gress: Gress, parser: Parser) {
        self.parsers[gress.index()] = parser;
    }

    pub fn set_deparser(&mut self, gress: Gress, deparser: Deparser) {
        self.deparsers[gress.index()] = deparser;
    }

    /// Global id of the first table a gress runs, `None` to skip the MAU.
    pub fn set_first_table(&mut self, gress: Gress, table: Option<u16>) {
        self.first_table[gress.index()] = table;
    }

    /// Check the tEOP bus delays of every stage against the bus usage of the stages before it.
    pub fn check_teop_delays(&mut self) -> Result<(), CoordinatorError> {
        mau::teop::check_teop_delays(self.stages.iter_mut().map(MauStage::teop_mut))?;
        Ok(())
    }

    #[must_use]
    pub fn time(&self) -> u64 {
        self.time
    }

    fn traverse(&mut self, gress: Gress, packet: Packet) -> Result<Traversal, CoordinatorError> {
        let g = gress.index();
        let time = self.time;
        self.time += 1;

        let mut parsed = self.parsers[g].parse(&packet)?;
        parsed.phv.set_relative_time(time);
        let pkt_len = u32::try_from(packet.len()).unwrap_or(u32::MAX);
        let mut io = MauIo::new(gress, self.first_table[g], pkt_len, time);
        for stage in &mut self.stages {
            io.time = time + stage.stage() as u64 * u64::from(self.config.pipe_latency);
            let results = stage.process(gress, &mut parsed.phv, &mut io)?;
            // the other gress has no packet in this slot
            stage.process_nop(gress.other(), io.time);
            trace!(pipe = self.pipe, stage = stage.stage(), %gress, "hit {:#06x}", results.lt_hit);
        }
        // tEOP: the buses are consumed once the whole packet has gone by
        let eop = time + self.stages.len() as u64 * u64::from(self.config.pipe_latency);
        if !io.teop.is_empty() {
            for stage in &mut self.stages {
                stage.process_teop(&io.teop, eop)?;
            }
        }
        Ok(Traversal {
            deparsed: self.deparsers[g].deparse(packet, &parsed.fields, &parsed.phv),
            error: parsed.error,
        })
    }

    /// Run a packet from a port through the ingress gress.
    #[tracing::instrument(
        level = "debug",
        skip(self, packet),
        fields(pipe = self.pipe, port = packet.port)
    )]
    pub fn process_ingress(&mut self, packet: Packet) -> Result<IngressOutput, CoordinatorError> {
        let resubmitted = packet.resubmitted;
        let Traversal { deparsed, error } = self.traverse(Gress::Ingress, packet)?;
        let mut output = IngressOutput::default();
        if deparsed.drop {
            debug!("dropped by ingress");
            return Ok(output);
        }
        if deparsed.resubmit && !resubmitted {
            let mut packet = deparsed.packet;
            packet.resubmitted = true;
            output.resubmit = Some(packet);
            return Ok(output);
        }
        if let Some(port) = deparsed.mirror {
            let mut copy = deparsed.packet.clone();
            copy.port = port;
            output.mirror = Some(copy);
        }
        match deparsed.egress_port {
            Some(port) => {
                let mut packet = deparsed.packet;
                packet.port = port;
                output.forward = Some(packet);
            }
            None => debug!(parse_error = error, "no egress port, dropping"),
        }
        Ok(output)
    }

    /// Run a packet from the traffic manager through the egress gress. Returns the packet to
    /// transmit unless egress dropped it.
    #[tracing::instrument(
        level = "debug",
        skip(self, packet),
        fields(pipe = self.pipe, port = packet.port)
    )]
    pub fn process_egress(&mut self, packet: Packet) -> Result<Option<Packet>, CoordinatorError> {
        let port = packet.port;
        let Traversal { deparsed, .. } = self.traverse(Gress::Egress, packet)?;
        if deparsed.drop {
            debug!("dropped by egress");
            return Ok(None);
        }
        let mut packet = deparsed.packet;
        packet.port = deparsed.egress_port.unwrap_or(port);
        Ok(Some(packet))
    }
}

/// All pipes of the model, each behind its own lock.
#[derive(Debug)]
pub struct Pipes {
    pipes: Vec<Mutex<Pipe>>,
}

impl Pipes {
    #[must_use]
    pub fn new(pipes: Vec<Pipe>) -> Self {
        Self {
            pipes: pipes.into_iter().map(Mutex::new).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    pub fn lock(&self, pipe: usize) -> Result<MutexGuard<'_, Pipe>, CoordinatorError> {
        self.pipes
            .get(pipe)
            .map(Mutex::lock)
            .ok_or(CoordinatorError::InvalidPipe(pipe))
    }

    fn with_stage<T>(
        &self,
        table: TableKey,
        f: impl FnOnce(&mut MauStage) -> Result<T, SweeperError>,
    ) -> Result<T, SweeperError> {
        let mut pipe = self
            .pipes
            .get(table.pipe)
            .ok_or(SweeperError::UnknownTable(table))?
            .lock();
        let stage = pipe
            .stage_mut(table.stage)
            .map_err(|_| SweeperError::UnknownTable(table))?;
        f(stage)
    }
}

impl SweepHandler for Pipes {
    fn age_idle(&self, table: TableKey) -> Result<Vec<u32>, SweeperError> {
        self.with_stage(table, |stage| Ok(stage.sweep_idle(table.lt)))
    }

    fn dump_idle(&self, table: TableKey) -> Result<Vec<(u32, u8)>, SweeperError> {
        self.with_stage(table, |stage| {
            Ok(stage.idle_table(table.lt).map(mau::idle::IdleTable::entries).unwrap_or_default())
        })
    }

    fn dump_stats(
        &self,
        table: TableKey,
        word: Option<u32>,
    ) -> Result<Vec<StatsEntry>, SweeperError> {
        self.with_stage(table, |stage| {
            stage.dump_stats(table.lt, word).map_err(SweeperError::from)
        })
    }

    fn evict_stats(&self, table: TableKey, word: u32) -> Result<Vec<StatsEntry>, SweeperError> {
        self.with_stage(table, |stage| {
            stage.evict_stats(table.lt, word).map_err(SweeperError::from)
        })
    }

    fn sweep_stage(
        &self,
        pipe: usize,
        stage: usize,
        cycles: u64,
    ) -> Result<Vec<(usize, StatsEntry)>, SweeperError> {
        let Some(pipe) = self.pipes.get(pipe) else {
            return Ok(Vec::new());
        };
        let mut pipe = pipe.lock();
        let Ok(stage) = pipe.stage_mut(stage) else {
            return Ok(Vec::new());
        };
        let cleared = stage.continue_counter_clears(cycles);
        if cleared > 0 {
            trace!(stage = stage.stage(), "{cleared} counter entries cleared");
        }
        Ok(stage.drain_lrt_evictions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::make_port;
    use crate::parser::{DROP_WORD, EGRESS_PORT_WORD, L4_DST_PORT_WORD, RESUBMIT_WORD};
    use config::ModelConfigBuilder;
    use mau::MauError;
    use mau::logical_table::{ActionSource, LogicalTableBuilder, PhvWrite};
    use mau::table_id;
    use mau::teop::{HDRTIME_ENABLE, TeopField};
    use pretty_assertions::assert_eq;

    fn udp_packet(port: u16) -> Packet {
        let mut data = vec![0u8; 64];
        data[12] = 0x08;
        data[14] = 0x45;
        data[23] = 17;
        data[36..38].copy_from_slice(&[0x00, 0x35]);
        Packet::new(port, &data)
    }

    fn pipe_with_actions(actions: Vec<PhvWrite>) -> Pipe {
        let config = ModelConfigBuilder::default()
            .num_pipes(1)
            .num_stages(2)
            .build()
            .expect("valid config");
        let mut pipe = Pipe::new(0, Arc::new(config)).expect("valid pipe");
        let table = LogicalTableBuilder::default()
            .hit_actions(actions)
            .build()
            .expect("valid table");
        pipe.stage_mut(1).expect("stage").set_table(3, table).expect("valid lt");
        pipe.set_first_table(Gress::Ingress, Some(table_id(1, 3)));
        pipe
    }

    fn write(word: usize, value: u32) -> PhvWrite {
        PhvWrite {
            word,
            source: ActionSource::Const(value),
        }
    }

    #[test]
    fn ingress_forwards_to_chosen_port() {
        let mut pipe =
            pipe_with_actions(vec![write(EGRESS_PORT_WORD, 7), write(L4_DST_PORT_WORD, 0x0044)]);
        let out = pipe.process_ingress(udp_packet(make_port(0, 1))).expect("processed");
        let fwd = out.forward.expect("forwarded");
        assert_eq!(fwd.port, 7);
        // egress saw a NOP in each stage the ingress packet went through
        let latency = u64::from(pipe.config.pipe_latency);
        assert_eq!(pipe.stage(1).expect("stage").last_nop(Gress::Egress), latency);
        assert_eq!(pipe.stage(1).expect("stage").last_nop(Gress::Ingress), 0);
        assert_eq!(fwd.data[36..38], [0x00, 0x44]);
        assert_eq!((out.mirror, out.resubmit), (None, None));

        let egress = pipe.process_egress(fwd.clone()).expect("processed");
        assert_eq!(egress, Some(fwd));
        assert_eq!(pipe.time(), 2);
    }

    #[test]
    fn no_egress_port_drops() {
        let mut pipe = pipe_with_actions(Vec::new());
        let out = pipe.process_ingress(udp_packet(1)).expect("processed");
        assert_eq!(out, IngressOutput::default());

        let mut pipe = pipe_with_actions(vec![write(EGRESS_PORT_WORD, 7), write(DROP_WORD, 1)]);
        let out = pipe.process_ingress(udp_packet(1)).expect("processed");
        assert_eq!(out, IngressOutput::default());
    }

    #[test]
    fn resubmit_happens_once() {
        let mut pipe = pipe_with_actions(vec![write(EGRESS_PORT_WORD, 7), write(RESUBMIT_WORD, 1)]);
        let out = pipe.process_ingress(udp_packet(1)).expect("processed");
        let again = out.resubmit.expect("resubmitted");
        assert!(again.resubmitted);
        assert_eq!(out.forward, None);
        let out = pipe.process_ingress(again).expect("processed");
        assert_eq!(out.resubmit, None);
        assert_eq!(out.forward.map(|p| p.port), Some(7));
    }

    #[test]
    fn teop_delays_follow_bus_usage() {
        let config = ModelConfigBuilder::default()
            .num_pipes(1)
            .num_stages(2)
            .strict_teop_delay_check(true)
            .build()
            .expect("valid config");
        let required = u64::from(config.pipe_latency - config.predication_delay - 7);
        let mut pipe = Pipe::new(0, Arc::new(config)).expect("valid pipe");
        assert_eq!(pipe.check_teop_delays(), Ok(()));

        let teop = pipe.stage_mut(1).expect("stage").teop_mut();
        teop.set_field(TeopField::BusHdrtimeLt(2), HDRTIME_ENABLE | 3);
        assert_eq!(
            pipe.check_teop_delays(),
            Err(CoordinatorError::Mau(MauError::TeopDelayMismatch {
                bus: 2,
                configured: 0,
                required,
            }))
        );
        let teop = pipe.stage_mut(1).expect("stage").teop_mut();
        teop.set_field(TeopField::BusDelay(2), required);
        assert_eq!(pipe.check_teop_delays(), Ok(()));
    }

    #[test]
    fn pipes_serve_the_sweeper() {
        let pipes = Pipes::new(vec![pipe_with_actions(Vec::new())]);
        {
            let mut pipe = pipes.lock(0).expect("pipe");
            let stage = pipe.stage_mut(1).expect("stage");
            stage.set_idle_table(3, 0).expect("valid lt");
            stage.idle_table_mut(3).expect("idle").activate(0);
        }
        let key = TableKey::new(0, 1, 3);
        assert_eq!(pipes.dump_idle(key), Ok(vec![(0, 3)]));
        for _ in 0..2 {
            assert_eq!(pipes.age_idle(key), Ok(Vec::new()));
        }
        assert_eq!(pipes.age_idle(key), Ok(vec![0]));
        assert_eq!(pipes.dump_stats(key, None), Ok(Vec::new()));
        assert_eq!(pipes.sweep_stage(0, 1, 100), Ok(Vec::new()));
        let missing = TableKey::new(2, 0, 0);
        assert_eq!(pipes.age_idle(missing), Err(SweeperError::UnknownTable(missing)));
        assert!(matches!(pipes.lock(5), Err(CoordinatorError::InvalidPipe(5))));
    }
}
