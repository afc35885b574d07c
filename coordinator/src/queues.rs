// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Packet queues of one pipe, and the claim that makes a worker the pipe's only user.

use crate::packet::Packet;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Default)]
struct QueueState {
    rx: VecDeque<Packet>,
    pgen: VecDeque<Packet>,
    tm: VecDeque<Packet>,
    /// Take the next input from the packet generator queue first.
    pgen_turn: bool,
    /// Favour the TM queue on the next activation when gresses run separately.
    tm_turn: bool,
    active: bool,
}

impl QueueState {
    fn next_input(&mut self) -> Option<Packet> {
        let first_pgen = self.pgen_turn;
        self.pgen_turn = !self.pgen_turn;
        if first_pgen {
            self.pgen.pop_front().or_else(|| self.rx.pop_front())
        } else {
            self.rx.pop_front().or_else(|| self.pgen.pop_front())
        }
    }

    fn has_input(&self) -> bool {
        !self.rx.is_empty() || !self.pgen.is_empty()
    }
}

/// Activation counters of a pipe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipeStats {
    pub activations: u64,
    /// Largest number of workers seen holding the pipe at once.
    pub max_concurrent: u32,
}

#[derive(Debug, Default)]
pub struct PerPipeQueues {
    state: Mutex<QueueState>,
    activations: AtomicU64,
    concurrent: AtomicU32,
    max_concurrent: AtomicU32,
}

/// A claimed pipe with the packets taken from its queues. Dropping it releases the pipe.
#[derive(Debug)]
pub struct PipeClaim<'a> {
    queues: &'a PerPipeQueues,
    /// Packet from a port or the packet generator, for ingress.
    pub input: Option<Packet>,
    /// Packet from the traffic manager, for egress.
    pub output: Option<Packet>,
}

impl Drop for PipeClaim<'_> {
    fn drop(&mut self) {
        self.queues.concurrent.fetch_sub(1, Ordering::AcqRel);
        self.queues.state.lock().active = false;
    }
}

impl PerPipeQueues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, packet: Packet, pgen: bool) {
        let mut state = self.state.lock();
        if pgen {
            state.pgen.push_back(packet);
        } else {
            state.rx.push_back(packet);
        }
    }

    pub fn enqueue_tm(&self, packet: Packet) {
        self.state.lock().tm.push_back(packet);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        let state = self.state.lock();
        !state.has_input() && state.tm.is_empty()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Claim the pipe if no one else holds it and it has work. The claim carries at most one
    /// ingress and one egress packet, or only one of the two when `separately` is set.
    pub fn dequeue(&self, separately: bool) -> Option<PipeClaim<'_>> {
        let mut state = self.state.lock();
        if state.active || (!state.has_input() && state.tm.is_empty()) {
            return None;
        }
        let (input, output) = if separately {
            let tm_first = state.tm_turn;
            state.tm_turn = !state.tm_turn;
            if (tm_first && !state.tm.is_empty()) || !state.has_input() {
                (None, state.tm.pop_front())
            } else {
                (state.next_input(), None)
            }
        } else {
            (state.next_input(), state.tm.pop_front())
        };
        state.active = true;
        drop(state);

        self.activations.fetch_add(1, Ordering::Relaxed);
        let now = self.concurrent.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_concurrent.fetch_max(now, Ordering::AcqRel);
        Some(PipeClaim {
            queues: self,
            input,
            output,
        })
    }

    #[must_use]
    pub fn stats(&self) -> PipeStats {
        PipeStats {
            activations: self.activations.load(Ordering::Relaxed),
            max_concurrent: self.max_concurrent.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pkt(tag: u8) -> Packet {
        Packet::new(0, &[tag])
    }

    #[test]
    fn claim_is_exclusive() {
        let queues = PerPipeQueues::new();
        assert!(queues.dequeue(false).is_none());
        queues.enqueue(pkt(1), false);
        queues.enqueue(pkt(2), false);
        let claim = queues.dequeue(false).expect("work");
        assert_eq!(claim.input, Some(pkt(1)));
        assert!(queues.is_active());
        assert!(queues.dequeue(false).is_none());
        drop(claim);
        assert!(!queues.is_active());
        assert_eq!(queues.dequeue(false).expect("work").input, Some(pkt(2)));
        assert!(queues.is_empty());
        assert_eq!(
            queues.stats(),
            PipeStats {
                activations: 2,
                max_concurrent: 1
            }
        );
    }

    #[test]
    fn inputs_alternate_with_packet_generator() {
        let queues = PerPipeQueues::new();
        queues.enqueue(pkt(1), false);
        queues.enqueue(pkt(2), false);
        queues.enqueue(pkt(10), true);
        queues.enqueue(pkt(11), true);
        let order: Vec<_> =
            std::iter::from_fn(|| queues.dequeue(false).and_then(|c| c.input.clone()))
                .map(|p| p.data[0])
                .collect();
        assert_eq!(order, vec![1, 10, 2, 11]);
    }

    #[test]
    fn gresses_together_or_separately() {
        let queues = PerPipeQueues::new();
        queues.enqueue(pkt(1), false);
        queues.enqueue_tm(pkt(2));
        let claim = queues.dequeue(false).expect("work");
        assert_eq!((claim.input.clone(), claim.output.clone()), (Some(pkt(1)), Some(pkt(2))));
        drop(claim);

        queues.enqueue(pkt(3), false);
        queues.enqueue_tm(pkt(4));
        let claim = queues.dequeue(true).expect("work");
        assert_eq!((claim.input.clone(), claim.output.clone()), (Some(pkt(3)), None));
        drop(claim);
        let claim = queues.dequeue(true).expect("work");
        assert_eq!((claim.input.clone(), claim.output.clone()), (None, Some(pkt(4))));
    }
}
