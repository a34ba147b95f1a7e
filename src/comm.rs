//! Message passing between the processes of a run.
//!
//! Processes are modelled as ranks executing the same bulk-synchronous
//! sequence of collective operations; within a rank everything is
//! single-threaded. The two operations the ablation pipeline needs are an
//! irregular neighbour exchange of tagged payloads and a sum allreduce.
//! Both gather contributions in ascending rank order, so any value derived
//! from them is bit-identical on every rank.
//!
//! A protocol violation (mismatched collective sequence, a dead peer) is
//! fatal, like a failed collective in any message-passing runtime.

use std::collections::VecDeque;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Collective operations available to the ablation pipeline.
pub trait Comm {
    fn rank(&self) -> usize;
    fn nranks(&self) -> usize;

    /// Irregular neighbour exchange: deliver each `(rank, payload)` datum to
    /// its destination and return the payloads received this round, ordered
    /// by sending rank.
    fn exchange(&mut self, sends: Vec<(usize, Vec<f64>)>) -> Vec<Vec<f64>>;

    /// Global sum, identical on every rank.
    fn allreduce_sum(&mut self, v: f64) -> f64;

    /// Global sum of counters, identical on every rank.
    fn allreduce_sum_u64(&mut self, v: u64) -> u64;
}

/// Single-process world: exchanges deliver nothing, reductions echo.
#[derive(Debug, Default)]
pub struct SerialComm;

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn nranks(&self) -> usize {
        1
    }

    fn exchange(&mut self, sends: Vec<(usize, Vec<f64>)>) -> Vec<Vec<f64>> {
        assert!(
            sends.is_empty(),
            "serial world has no peers to exchange with"
        );
        Vec::new()
    }

    fn allreduce_sum(&mut self, v: f64) -> f64 {
        v
    }

    fn allreduce_sum_u64(&mut self, v: u64) -> u64 {
        v
    }
}

enum Packet {
    Exchange(Vec<Vec<f64>>),
    Scalar(f64),
    Counter(u64),
}

struct Tagged {
    from: usize,
    packet: Packet,
}

/// Channel-backed world: one thread per rank, every pair connected. Used by
/// multi-rank tests and the demo to validate that the synchronization
/// protocol keeps duplicated corner values bit-identical.
pub struct ChannelComm {
    rank: usize,
    nranks: usize,
    txs: Vec<Sender<Tagged>>,
    rx: Receiver<Tagged>,
    /// Out-of-order packets buffered per sender; a fast peer may already be
    /// one collective ahead.
    pending: Vec<VecDeque<Packet>>,
}

impl ChannelComm {
    /// Build a fully-connected world of `nranks` endpoints.
    pub fn world(nranks: usize) -> Vec<ChannelComm> {
        let mut txs = Vec::with_capacity(nranks);
        let mut rxs = Vec::with_capacity(nranks);
        for _ in 0..nranks {
            let (tx, rx) = unbounded();
            txs.push(tx);
            rxs.push(rx);
        }
        rxs.into_iter()
            .enumerate()
            .map(|(rank, rx)| ChannelComm {
                rank,
                nranks,
                txs: txs.clone(),
                rx,
                pending: (0..nranks).map(|_| VecDeque::new()).collect(),
            })
            .collect()
    }

    fn send(&self, to: usize, packet: Packet) {
        self.txs[to]
            .send(Tagged {
                from: self.rank,
                packet,
            })
            .expect("comm peer disconnected");
    }

    /// Next packet from a specific sender, buffering any that arrive from
    /// other ranks in the meantime.
    fn take_from(&mut self, from: usize) -> Packet {
        loop {
            if let Some(packet) = self.pending[from].pop_front() {
                return packet;
            }
            let tagged = self.rx.recv().expect("comm peer disconnected");
            self.pending[tagged.from].push_back(tagged.packet);
        }
    }
}

impl Comm for ChannelComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn nranks(&self) -> usize {
        self.nranks
    }

    fn exchange(&mut self, sends: Vec<(usize, Vec<f64>)>) -> Vec<Vec<f64>> {
        // Group payloads by destination; every peer gets exactly one packet
        // per round so receivers know when the round is complete.
        let mut outgoing: Vec<Vec<Vec<f64>>> = (0..self.nranks).map(|_| Vec::new()).collect();
        for (to, payload) in sends {
            assert!(to != self.rank, "exchange datum addressed to self");
            outgoing[to].push(payload);
        }
        for to in 0..self.nranks {
            if to == self.rank {
                continue;
            }
            self.send(to, Packet::Exchange(std::mem::take(&mut outgoing[to])));
        }

        let mut received = Vec::new();
        for from in 0..self.nranks {
            if from == self.rank {
                continue;
            }
            match self.take_from(from) {
                Packet::Exchange(payloads) => received.extend(payloads),
                _ => panic!("comm protocol mismatch in exchange"),
            }
        }
        received
    }

    fn allreduce_sum(&mut self, v: f64) -> f64 {
        for to in 0..self.nranks {
            if to != self.rank {
                self.send(to, Packet::Scalar(v));
            }
        }
        // Fixed rank-order accumulation keeps the result bit-identical
        // everywhere.
        let mut total = 0.0;
        for from in 0..self.nranks {
            if from == self.rank {
                total += v;
                continue;
            }
            match self.take_from(from) {
                Packet::Scalar(x) => total += x,
                _ => panic!("comm protocol mismatch in allreduce"),
            }
        }
        total
    }

    fn allreduce_sum_u64(&mut self, v: u64) -> u64 {
        for to in 0..self.nranks {
            if to != self.rank {
                self.send(to, Packet::Counter(v));
            }
        }
        let mut total = 0;
        for from in 0..self.nranks {
            if from == self.rank {
                total += v;
                continue;
            }
            match self.take_from(from) {
                Packet::Counter(x) => total += x,
                _ => panic!("comm protocol mismatch in allreduce"),
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_world_exchanges_and_reduces() {
        let worlds = ChannelComm::world(3);
        let handles: Vec<_> = worlds
            .into_iter()
            .map(|mut comm| {
                std::thread::spawn(move || {
                    let me = comm.rank();
                    // Each rank sends its id to every other rank.
                    let sends: Vec<(usize, Vec<f64>)> = (0..3)
                        .filter(|&to| to != me)
                        .map(|to| (to, vec![me as f64]))
                        .collect();
                    let recv = comm.exchange(sends);
                    let mut got: Vec<f64> = recv.into_iter().map(|p| p[0]).collect();
                    got.sort_by(f64::total_cmp);

                    let total = comm.allreduce_sum((me + 1) as f64);
                    let count = comm.allreduce_sum_u64(1);
                    (me, got, total, count)
                })
            })
            .collect();

        for h in handles {
            let (me, got, total, count) = h.join().unwrap();
            let expect: Vec<f64> = (0..3).filter(|&r| r != me).map(|r| r as f64).collect();
            assert_eq!(got, expect);
            assert_eq!(total, 6.0);
            assert_eq!(count, 3);
        }
    }

    #[test]
    fn serial_world_is_trivial() {
        let mut comm = SerialComm;
        assert_eq!(comm.nranks(), 1);
        assert!(comm.exchange(Vec::new()).is_empty());
        assert_eq!(comm.allreduce_sum(2.5), 2.5);
    }
}
