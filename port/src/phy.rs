// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Physical NIC ports.
//!
//! Probing and driving the NIC is an external concern; the datapath is
//! handed an [`EthDev`] per enabled physical port and pulls per-worker
//! queues out of it.  [`LoopbackDev`] stands in for real hardware in tests.

use std::collections::VecDeque;
use std::sync::Arc;

use net::{Pkt, PktPool};
use parking_lot::Mutex;

use crate::traits::{PacketReader, PacketWriter, RxBurst, SharedStats, TxSink};

/// One NIC queue: single-owner, polled.
pub trait EthQueue: Send {
    /// Receive one frame into `buf`, returning its length, or `None` when
    /// the queue is empty.
    fn rx(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Submit one frame; `false` when the queue is full.
    fn tx(&mut self, frame: &[u8]) -> bool;
}

/// A NIC device handing out per-worker queues.
pub trait EthDev: Send + Sync {
    /// The receive queue polled by `worker`.
    fn rx_queue(&self, worker: usize) -> Box<dyn EthQueue>;
    /// The transmit queue owned by `worker`.
    fn tx_queue(&self, worker: usize) -> Box<dyn EthQueue>;
}

impl core::fmt::Debug for dyn EthDev {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("EthDev")
    }
}

/// Reader half of a physical port.
pub struct PhyReader {
    queue: Box<dyn EthQueue>,
    pool: Arc<PktPool>,
    stats: SharedStats,
    port: u32,
    worker: usize,
}

impl PhyReader {
    #[must_use]
    pub fn new(
        queue: Box<dyn EthQueue>,
        pool: Arc<PktPool>,
        stats: SharedStats,
        port: u32,
        worker: usize,
    ) -> PhyReader {
        PhyReader {
            queue,
            pool,
            stats,
            port,
            worker,
        }
    }
}

impl PacketReader for PhyReader {
    fn rx(&mut self, burst: &mut RxBurst) -> usize {
        let mut got = 0;
        while burst.remaining_capacity() > 0 {
            let Some(mut pkt) = self.pool.alloc() else {
                self.stats.vport(self.port, self.worker).rx_drop_add(1);
                break;
            };
            let buf = self.pool.get_mut(&mut pkt);
            match self.queue.rx(buf.frame_room_mut()) {
                Some(len) => {
                    #[allow(clippy::cast_possible_truncation)] // room is 2048
                    if buf.set_data_len(len as u16).is_err() {
                        self.stats.vport(self.port, self.worker).rx_drop_add(1);
                        self.pool.free(pkt);
                        continue;
                    }
                    burst.push(pkt);
                    got += 1;
                }
                None => {
                    self.pool.free(pkt);
                    break;
                }
            }
        }
        got
    }
}

/// Writer half of a physical port.
pub struct PhyWriter {
    queue: Box<dyn EthQueue>,
    pool: Arc<PktPool>,
    stats: SharedStats,
    sink: TxSink,
}

impl PhyWriter {
    #[must_use]
    pub fn new(
        queue: Box<dyn EthQueue>,
        pool: Arc<PktPool>,
        stats: SharedStats,
        sink: TxSink,
    ) -> PhyWriter {
        PhyWriter {
            queue,
            pool,
            stats,
            sink,
        }
    }
}

impl PacketWriter for PhyWriter {
    fn tx(&mut self, mut pkt: Pkt) {
        let cell = self.sink.cell(&self.stats);
        let frame = self.pool.get_mut(&mut pkt);
        if self.queue.tx(frame.data()) {
            cell.tx_add(1);
        } else {
            cell.tx_drop_add(1);
        }
        self.pool.free(pkt);
    }

    fn flush(&mut self) {
        // The queue submits immediately; nothing is batched here.
    }
}

/// An in-memory [`EthDev`] with one shared frame queue per direction.
#[derive(Default)]
pub struct LoopbackDev {
    inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
    outbound: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl LoopbackDev {
    #[must_use]
    pub fn new() -> LoopbackDev {
        LoopbackDev::default()
    }

    /// Queue a frame for the datapath to receive.
    pub fn inject(&self, frame: &[u8]) {
        self.inbound.lock().push_back(frame.to_vec());
    }

    /// Frames the datapath transmitted so far.
    #[must_use]
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.outbound.lock().clone()
    }
}

struct LoopbackQueue {
    inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
    outbound: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl EthQueue for LoopbackQueue {
    fn rx(&mut self, buf: &mut [u8]) -> Option<usize> {
        let frame = self.inbound.lock().pop_front()?;
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Some(len)
    }

    fn tx(&mut self, frame: &[u8]) -> bool {
        self.outbound.lock().push(frame.to_vec());
        true
    }
}

impl EthDev for LoopbackDev {
    fn rx_queue(&self, _worker: usize) -> Box<dyn EthQueue> {
        Box::new(LoopbackQueue {
            inbound: Arc::clone(&self.inbound),
            outbound: Arc::clone(&self.outbound),
        })
    }

    fn tx_queue(&self, _worker: usize) -> Box<dyn EthQueue> {
        Box::new(LoopbackQueue {
            inbound: Arc::clone(&self.inbound),
            outbound: Arc::clone(&self.outbound),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use stats::StatsTable;

    #[test]
    fn frames_move_through_the_device() {
        let dev = LoopbackDev::new();
        let pool = Arc::new(PktPool::new("phy_test_pool", 8).unwrap());
        let stats = Arc::new(StatsTable::new(crate::MAX_VPORTS, 1));

        dev.inject(&[0xAB; 64]);
        let mut reader = PhyReader::new(
            dev.rx_queue(0),
            Arc::clone(&pool),
            Arc::clone(&stats),
            0,
            0,
        );
        let mut burst = RxBurst::new();
        assert_eq!(reader.rx(&mut burst), 1);

        let mut writer = PhyWriter::new(
            dev.tx_queue(0),
            Arc::clone(&pool),
            Arc::clone(&stats),
            TxSink::Vport { port: 0, worker: 0 },
        );
        writer.tx(burst.pop().unwrap());
        assert_eq!(dev.transmitted(), vec![vec![0xAB; 64]]);
        assert_eq!(stats.vport(0, 0).get().tx, 1);
        assert_eq!(pool.available(), 8);
    }
}
