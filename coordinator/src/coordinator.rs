// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The packet coordinator: worker threads moving packets through the pipes.
//!
//! Every worker scans the pipes round robin, starting after the pipe it served last, claims
//! the first one with queued work and runs the claimed packets to completion. A pipe is only
//! ever claimed by one worker at a time; different pipes run in parallel.

use crate::error::CoordinatorError;
use crate::packet::{Packet, pipe_of_port, port_map_outbound};
use crate::pipe::{Pipe, Pipes};
use crate::queues::{PerPipeQueues, PipeClaim, PipeStats};
use crate::tm::{TmAction, TrafficManager};
use config::ModelConfig;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// How long worker 0 sleeps before rechecking for idle waiters.
const IDLE_CHECK_PERIOD: Duration = Duration::from_secs(10);
/// Default bound on [`RmtPacketCoordinator::wait_for_idle`].
const MAX_IDLE_WAIT: Duration = Duration::from_secs(300);
const IDLE_POLL: Duration = Duration::from_millis(100);
const STOP_REPOLL: Duration = Duration::from_millis(1);
/// Bytes of FCS stripped from packets delivered to the PCIe port.
const FCS_LEN: usize = 4;

/// Transmit to an external port: `(external port, bytes)`. Called from worker threads.
pub type TxFn = Arc<dyn Fn(u16, &[u8]) + Send + Sync>;
/// Deliver to the CPU over PCIe: `(bytes without FCS, class of service)`.
pub type PcieRxFn = Arc<dyn Fn(&[u8], u8) + Send + Sync>;
/// Whether the replication engine has nothing left in flight.
pub type IdlePredicate = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    tx: Option<TxFn>,
    pcie_rx: Option<PcieRxFn>,
    pre_fifo_empty: Option<IdlePredicate>,
}

#[derive(Debug, Default)]
struct SyncState {
    pending: u64,
    waiting: usize,
    threads: usize,
    /// Bumped on every arrival and every released claim.
    epoch: u64,
}

struct Shared {
    config: Arc<ModelConfig>,
    pipes: Arc<Pipes>,
    queues: Vec<PerPipeQueues>,
    tm: TrafficManager,
    run: AtomicBool,
    sync: Mutex<SyncState>,
    work_cv: Condvar,
    /// Workers that found every pipe with work claimed by someone else.
    claim_cv: Condvar,
    idle_cv: Condvar,
    callbacks: RwLock<Callbacks>,
    transmitted: AtomicU64,
}

impl Shared {
    fn queues(&self, pipe: usize) -> Result<&PerPipeQueues, CoordinatorError> {
        self.queues.get(pipe).ok_or(CoordinatorError::InvalidPipe(pipe))
    }

    fn packet_arrived(&self) {
        let mut sync = self.sync.lock();
        sync.pending += 1;
        sync.epoch += 1;
        drop(sync);
        self.work_cv.notify_one();
        self.claim_cv.notify_one();
    }

    /// Account for a released claim that consumed `n` packets.
    fn packets_processed(&self, n: u64) {
        let mut sync = self.sync.lock();
        sync.pending = sync.pending.saturating_sub(n);
        sync.epoch += 1;
        if sync.pending == 0 {
            self.idle_cv.notify_all();
        }
        drop(sync);
        self.claim_cv.notify_all();
    }

    fn is_idle(&self, sync: &MutexGuard<'_, SyncState>) -> bool {
        sync.waiting == sync.threads
            && sync.pending == 0
            && self
                .callbacks
                .read()
                .pre_fifo_empty
                .as_ref()
                .is_none_or(|empty| empty())
    }

    /// Park a worker whose scan found nothing to claim. `seen` is the epoch read before the
    /// scan; any arrival or release since then sends the worker back to scanning.
    fn wait_for_packets(&self, worker: usize, seen: u64) {
        let mut sync = self.sync.lock();
        if sync.epoch != seen || !self.run.load(Ordering::Acquire) {
            return;
        }
        if sync.pending > 0 {
            // the work is held by other workers
            self.claim_cv.wait(&mut sync);
            return;
        }
        sync.waiting += 1;
        self.idle_cv.notify_all();
        if worker == 0 {
            if self.work_cv.wait_for(&mut sync, IDLE_CHECK_PERIOD).timed_out() {
                self.idle_cv.notify_all();
            }
        } else {
            self.work_cv.wait(&mut sync);
        }
        sync.waiting -= 1;
    }

    fn enqueue_to(&self, pipe: usize, packet: Packet, pgen: bool) -> Result<(), CoordinatorError> {
        self.queues(pipe)?.enqueue(packet, pgen);
        self.packet_arrived();
        Ok(())
    }

    fn enqueue_from_tm(&self, packet: Packet, pipe: usize) -> Result<(), CoordinatorError> {
        self.queues(pipe)?.enqueue_tm(packet);
        self.packet_arrived();
        Ok(())
    }

    fn transmit(&self, packet: &Packet) {
        self.transmitted.fetch_add(1, Ordering::Relaxed);
        let callbacks = self.callbacks.read();
        if packet.port == self.config.pcie_port {
            let len = packet.len().saturating_sub(FCS_LEN);
            let cos = packet.data.first().map_or(0, |b| b & 0x7);
            match &callbacks.pcie_rx {
                Some(rx) => rx(&packet.data[..len], cos),
                None => debug!("no PCIe receiver, dropping {len} bytes"),
            }
            return;
        }
        let port = port_map_outbound(packet.port);
        match &callbacks.tx {
            Some(tx) => tx(port, &packet.data),
            None => debug!(port, "no transmit function, dropping"),
        }
    }

    /// Run the packets of a claim. Returns the number of packets consumed.
    fn process(&self, pipe: usize, claim: &mut PipeClaim<'_>) -> u64 {
        let mut consumed = 0;
        if let Some(packet) = claim.input.take() {
            consumed += 1;
            let result = self.pipes.lock(pipe).and_then(|mut p| p.process_ingress(packet));
            match result {
                Ok(output) => {
                    for action in self.tm.route(output) {
                        let queued = match action {
                            TmAction::ToPipe(to, pkt) => self.enqueue_from_tm(pkt, to),
                            TmAction::Resubmit(pkt) => self.enqueue_to(pipe, pkt, false),
                        };
                        if let Err(e) = queued {
                            warn!(pipe, "dropping packet: {e}");
                        }
                    }
                }
                Err(e) => error!(pipe, "ingress failed: {e}"),
            }
        }
        if let Some(packet) = claim.output.take() {
            consumed += 1;
            let result = self.pipes.lock(pipe).and_then(|mut p| p.process_egress(packet));
            match result {
                Ok(Some(packet)) => self.transmit(&packet),
                Ok(None) => {}
                Err(e) => error!(pipe, "egress failed: {e}"),
            }
        }
        consumed
    }

    fn worker_loop(&self, worker: usize) {
        info!(worker, "worker started");
        let num_pipes = self.queues.len();
        let mut last = num_pipes.saturating_sub(1);
        let separately = self.config.process_gresses_separately;
        while self.run.load(Ordering::Acquire) {
            let seen = self.sync.lock().epoch;
            let claimed = (1..=num_pipes)
                .map(|k| (last + k) % num_pipes)
                .find_map(|p| self.queues[p].dequeue(separately).map(|c| (p, c)));
            match claimed {
                Some((pipe, mut claim)) => {
                    trace!(worker, pipe, "claimed pipe");
                    let consumed = self.process(pipe, &mut claim);
                    drop(claim);
                    self.packets_processed(consumed);
                    last = pipe;
                }
                None => self.wait_for_packets(worker, seen),
            }
        }
        info!(worker, "worker stopped");
    }
}

pub struct RmtPacketCoordinator {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for RmtPacketCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmtPacketCoordinator")
            .field("pipes", &self.shared.queues.len())
            .field("workers", &self.workers.len())
            .field("sync", &*self.shared.sync.lock())
            .finish_non_exhaustive()
    }
}

impl RmtPacketCoordinator {
    /// A coordinator over `config.num_pipes` default pipes.
    pub fn new(config: Arc<ModelConfig>) -> Result<Self, CoordinatorError> {
        let pipes = (0..config.num_pipes)
            .map(|p| Pipe::new(p, config.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_pipes(config, pipes))
    }

    #[must_use]
    pub fn with_pipes(config: Arc<ModelConfig>, pipes: Vec<Pipe>) -> Self {
        let queues = pipes.iter().map(|_| PerPipeQueues::new()).collect();
        let shared = Shared {
            tm: TrafficManager::new(config.clone()),
            pipes: Arc::new(Pipes::new(pipes)),
            queues,
            run: AtomicBool::new(false),
            sync: Mutex::new(SyncState::default()),
            work_cv: Condvar::new(),
            claim_cv: Condvar::new(),
            idle_cv: Condvar::new(),
            callbacks: RwLock::new(Callbacks::default()),
            transmitted: AtomicU64::new(0),
            config,
        };
        Self {
            shared: Arc::new(shared),
            workers: Vec::new(),
        }
    }

    /// The pipes, for configuration and for the sweeper.
    #[must_use]
    pub fn pipes(&self) -> Arc<Pipes> {
        self.shared.pipes.clone()
    }

    pub fn set_tx_function(&self, tx: TxFn) {
        self.shared.callbacks.write().tx = Some(tx);
    }

    pub fn set_pcie_rx_function(&self, rx: PcieRxFn) {
        self.shared.callbacks.write().pcie_rx = Some(rx);
    }

    pub fn set_pre_fifo_empty(&self, predicate: IdlePredicate) {
        self.shared.callbacks.write().pre_fifo_empty = Some(predicate);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.run.load(Ordering::Acquire)
    }

    /// Check the pipe configuration, then start `config.num_threads` workers.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn start(&mut self) -> Result<(), CoordinatorError> {
        if self.is_running() {
            return Err(CoordinatorError::AlreadyRunning);
        }
        for pipe in 0..self.shared.pipes.len() {
            self.shared.pipes.lock(pipe)?.check_teop_delays()?;
        }
        let threads = self.shared.config.num_threads;
        self.shared.sync.lock().threads = threads;
        self.shared.run.store(true, Ordering::Release);
        for worker in 0..threads {
            let shared = self.shared.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("rmt-worker-{worker}"))
                .spawn(move || shared.worker_loop(worker));
            match spawned {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    self.stop();
                    return Err(CoordinatorError::Thread(e.to_string()));
                }
            }
        }
        info!("{threads} workers over {} pipes", self.shared.queues.len());
        Ok(())
    }

    /// Stop and join the workers. Queued packets stay queued.
    pub fn stop(&mut self) {
        self.shared.run.store(false, Ordering::Release);
        // a worker may be between its run check and its wait, so keep waking until none waits
        loop {
            let sync = self.shared.sync.lock();
            self.shared.work_cv.notify_all();
            self.shared.claim_cv.notify_all();
            if sync.waiting == 0 {
                break;
            }
            drop(sync);
            std::thread::sleep(STOP_REPOLL);
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked");
            }
        }
        self.shared.sync.lock().threads = 0;
    }

    /// Queue a copy of `data` as a packet arriving on internal port `port`.
    pub fn enqueue(&self, port: u16, data: &[u8]) -> Result<(), CoordinatorError> {
        self.enqueue_packet(Packet::new(port, data), false)
    }

    /// Queue a packet on the receive queue of its port's pipe, or on the packet generator queue.
    pub fn enqueue_packet(&self, packet: Packet, pgen: bool) -> Result<(), CoordinatorError> {
        let Some(pipe) = pipe_of_port(&self.shared.config, packet.port) else {
            return Err(CoordinatorError::InvalidPort(packet.port));
        };
        trace!(port = packet.port, pgen, "enqueue {} bytes", packet.len());
        self.shared.enqueue_to(pipe, packet, pgen)
    }

    /// Re-inject a packet into the pipe of the port it is associated with.
    pub fn enqueue_resubmit(&self, packet: Packet) -> Result<(), CoordinatorError> {
        let pipe = pipe_of_port(&self.shared.config, packet.port)
            .ok_or(CoordinatorError::InvalidPort(packet.port))?;
        self.shared.enqueue_to(pipe, packet, false)
    }

    /// Hand a packet from the traffic manager to the egress of `pipe`.
    pub fn enqueue_from_tm(&self, packet: Packet, pipe: usize) -> Result<(), CoordinatorError> {
        self.shared.enqueue_from_tm(packet, pipe)
    }

    /// Send a packet out of the model.
    pub fn transmit(&self, packet: &Packet) {
        self.shared.transmit(packet);
    }

    /// Packets handed to [`RmtPacketCoordinator::transmit`] so far.
    #[must_use]
    pub fn transmitted(&self) -> u64 {
        self.shared.transmitted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn pending(&self) -> u64 {
        self.shared.sync.lock().pending
    }

    pub fn pipe_stats(&self, pipe: usize) -> Result<PipeStats, CoordinatorError> {
        Ok(self.shared.queues(pipe)?.stats())
    }

    /// Block until every worker waits, no packet is pending and the replication engine is
    /// empty.
    pub fn wait_for_idle(&self) -> Result<(), CoordinatorError> {
        self.wait_for_idle_within(MAX_IDLE_WAIT)
    }

    pub fn wait_for_idle_within(&self, limit: Duration) -> Result<(), CoordinatorError> {
        if !self.is_running() {
            return Err(CoordinatorError::NotRunning);
        }
        let deadline = Instant::now() + limit;
        let mut sync = self.shared.sync.lock();
        while !self.shared.is_idle(&sync) {
            let now = Instant::now();
            if now >= deadline {
                warn!(pending = sync.pending, waiting = sync.waiting, "not idle after {limit:?}");
                return Err(CoordinatorError::IdleTimeout);
            }
            self.shared
                .idle_cv
                .wait_for(&mut sync, IDLE_POLL.min(deadline - now));
        }
        Ok(())
    }
}

impl Drop for RmtPacketCoordinator {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}
