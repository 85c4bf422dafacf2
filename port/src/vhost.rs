// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Para-virt guest ports.
//!
//! The guest session plumbing (character device, queue negotiation) lives
//! outside the datapath; what the pipeline sees is a pair of named rings
//! gated by a device-attached flag.  While no guest is attached the reader
//! yields nothing and the writer drops.  Guest disconnect raises per-worker
//! teardown flags that each worker acknowledges at its loop boundary before
//! the host unmaps guest memory (see [`crate::vport::VportTable`]).

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use net::{Pkt, PktPool};
use ring::{Ring, RingParams, RingRegistry, SyncModel};
use tracing::warn;

use crate::traits::{PacketReader, PacketWriter, RxBurst, SharedStats, TxSink};

/// Enqueue retries when the guest's ring is full.
pub const TX_RETRIES: u32 = 4;
/// Fixed delay between those retries.
pub const TX_RETRY_DELAY: Duration = Duration::from_micros(10);
/// Writer batch size.
pub const TX_BURST_SIZE: usize = 32;

/// Capacity of each vhost port ring.
pub const VHOST_RING_SIZE: u32 = 1024;

fn ring_params(name: String) -> RingParams {
    RingParams {
        name,
        size: VHOST_RING_SIZE,
        mode: SyncModel::SPSC,
    }
}

/// Create (or look up) the rings of vhost port `id`.
///
/// # Errors
///
/// Returns a ring validation error; cannot happen for in-range ids.
pub fn ensure_rings(registry: &RingRegistry, id: u32) -> Result<(), ring::RingError> {
    registry.ensure(&ring_params(ring::names::vhost_rx_ring(id)))?;
    registry.ensure(&ring_params(ring::names::vhost_tx_ring(id)))?;
    Ok(())
}

/// Reader half of a vhost port.
pub struct VhostReader {
    rx: Arc<Ring>,
    attached: Arc<AtomicBool>,
}

impl VhostReader {
    /// Connect to the rx ring of vhost port `id`, gated by `attached`.
    ///
    /// # Errors
    ///
    /// Returns a [`ring::RingError`] if the ring is missing.
    pub fn new(
        registry: &RingRegistry,
        id: u32,
        attached: Arc<AtomicBool>,
    ) -> Result<VhostReader, ring::RingError> {
        Ok(VhostReader {
            rx: registry.lookup(&ring::names::vhost_rx_ring(id))?,
            attached,
        })
    }
}

impl PacketReader for VhostReader {
    fn rx(&mut self, burst: &mut RxBurst) -> usize {
        if !self.attached.load(Ordering::Acquire) {
            return 0;
        }
        let mut handles = [0u32; crate::RX_BURST];
        let want = burst.remaining_capacity().min(handles.len());
        let n = self.rx.dequeue_burst(&mut handles[..want]);
        for &raw in &handles[..n] {
            // SAFETY: the guest surrendered ownership by enqueueing to `rx`.
            burst.push(unsafe { Pkt::from_raw(raw) });
        }
        n
    }
}

/// Writer half of a vhost port.
pub struct VhostWriter {
    tx: Arc<Ring>,
    attached: Arc<AtomicBool>,
    pool: Arc<PktPool>,
    stats: SharedStats,
    sink: TxSink,
    buf: Vec<u32>,
}

impl VhostWriter {
    /// Connect to the tx ring of vhost port `id`, gated by `attached`.
    ///
    /// # Errors
    ///
    /// Returns a [`ring::RingError`] if the ring is missing.
    pub fn new(
        registry: &RingRegistry,
        id: u32,
        attached: Arc<AtomicBool>,
        pool: Arc<PktPool>,
        stats: SharedStats,
        sink: TxSink,
    ) -> Result<VhostWriter, ring::RingError> {
        Ok(VhostWriter {
            tx: registry.lookup(&ring::names::vhost_tx_ring(id))?,
            attached,
            pool,
            stats,
            sink,
            buf: Vec::with_capacity(TX_BURST_SIZE),
        })
    }

    fn send_burst(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let cell = self.sink.cell(&self.stats);
        if !self.attached.load(Ordering::Acquire) {
            // No guest behind the rings; everything queued here is lost.
            cell.tx_drop_add(self.buf.len() as u64);
            for &raw in &self.buf {
                // SAFETY: these handles never reached the guest.
                let pkt = unsafe { Pkt::from_raw(raw) };
                self.pool.free(pkt);
            }
            self.buf.clear();
            return;
        }

        let need = self.buf.len() as u32;
        let mut retry = 0;
        while self.tx.free_count() < need && retry < TX_RETRIES {
            crate::spin_delay(TX_RETRY_DELAY);
            retry += 1;
        }
        let sent = self.tx.enqueue_burst(&self.buf);
        cell.tx_add(sent as u64);
        let dropped = self.buf.len() - sent;
        if dropped > 0 {
            warn!("vhost port: dropping {dropped} frames, guest ring full");
            cell.tx_drop_add(dropped as u64);
            for &raw in &self.buf[sent..] {
                // SAFETY: these handles never reached the guest.
                let pkt = unsafe { Pkt::from_raw(raw) };
                self.pool.free(pkt);
            }
        }
        self.buf.clear();
    }
}

impl PacketWriter for VhostWriter {
    fn tx(&mut self, pkt: Pkt) {
        self.buf.push(pkt.into_raw());
        if self.buf.len() >= TX_BURST_SIZE {
            self.send_burst();
        }
    }

    fn flush(&mut self) {
        self.send_burst();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use stats::StatsTable;

    #[test]
    fn detached_reader_yields_nothing() {
        let registry = RingRegistry::new();
        ensure_rings(&registry, 40).unwrap();
        let attached = Arc::new(AtomicBool::new(false));
        let mut reader = VhostReader::new(&registry, 40, Arc::clone(&attached)).unwrap();

        let pool = Arc::new(PktPool::new("vhost_test_pool", 8).unwrap());
        let rx_ring = registry.lookup(&ring::names::vhost_rx_ring(40)).unwrap();
        rx_ring.enqueue(pool.alloc().unwrap().into_raw()).unwrap();

        let mut burst = RxBurst::new();
        assert_eq!(reader.rx(&mut burst), 0);

        attached.store(true, Ordering::Release);
        assert_eq!(reader.rx(&mut burst), 1);
        pool.free(burst.pop().unwrap());
    }

    #[test]
    fn detached_writer_drops_and_frees() {
        let registry = RingRegistry::new();
        ensure_rings(&registry, 41).unwrap();
        let pool = Arc::new(PktPool::new("vhost_test_pool2", 8).unwrap());
        let stats = Arc::new(StatsTable::new(crate::MAX_VPORTS, 1));
        let attached = Arc::new(AtomicBool::new(false));
        let mut writer = VhostWriter::new(
            &registry,
            41,
            attached,
            Arc::clone(&pool),
            Arc::clone(&stats),
            TxSink::Vport {
                port: 41,
                worker: 0,
            },
        )
        .unwrap();

        let before = pool.available();
        writer.tx(pool.alloc().unwrap());
        writer.flush();
        assert_eq!(stats.vport(41, 0).get().tx_drop, 1);
        assert_eq!(pool.available(), before);
        let tx_ring = registry.lookup(&ring::names::vhost_tx_ring(41)).unwrap();
        assert_eq!(tx_ring.count(), 0);
    }
}
