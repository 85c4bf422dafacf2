// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Shared-memory client ports.
//!
//! A client port talks to an untrusted co-located process over four named
//! rings.  The peer must not call into the slab allocator (shared mbuf
//! caches corrupt when foreign threads use them), so the datapath performs
//! every allocation and free on its behalf:
//!
//!  - `rx`: peer → datapath ingress
//!  - `tx`: datapath → peer egress
//!  - `free`: buffers the peer is done with; drained and freed here
//!  - `alloc`: buffers allocated here for the peer to take

use std::sync::Arc;
use std::time::Duration;

use net::{Pkt, PktPool};
use ring::{Ring, RingParams, RingRegistry, SyncModel};
use tracing::{debug, warn};

use crate::traits::{PacketReader, PacketWriter, RxBurst, SharedStats, TxSink};

/// Most buffers freed from the peer's `free` ring per reader visit.
pub const FREE_BURST: usize = 256;
/// Most buffers allocated onto the peer's `alloc` ring per reader visit.
pub const ALLOC_BURST: usize = 64;
/// Enqueue retries when the peer's `tx` ring is full.
pub const TX_RETRIES: u32 = 10;
/// Fixed delay between those retries.
pub const TX_RETRY_DELAY: Duration = Duration::from_micros(1);
/// Default writer batch size.
pub const TX_BURST_SIZE: usize = 32;

/// Capacity of each client port ring.
pub const CLIENT_RING_SIZE: u32 = 2048;

fn ring_params(name: String) -> RingParams {
    RingParams {
        name,
        size: CLIENT_RING_SIZE,
        // one datapath worker on one side, one peer process on the other
        mode: SyncModel::SPSC,
    }
}

/// Create (or look up) the four rings of client port `id`.
///
/// # Errors
///
/// Returns a ring validation error; cannot happen for in-range ids.
pub fn ensure_rings(registry: &RingRegistry, id: u32) -> Result<(), ring::RingError> {
    registry.ensure(&ring_params(ring::names::client_rx_ring(id)))?;
    registry.ensure(&ring_params(ring::names::client_tx_ring(id)))?;
    registry.ensure(&ring_params(ring::names::client_free_ring(id)))?;
    registry.ensure(&ring_params(ring::names::client_alloc_ring(id)))?;
    Ok(())
}

/// Reader half of a client port.
pub struct ClientReader {
    rx: Arc<Ring>,
    free: Arc<Ring>,
    alloc: Arc<Ring>,
    pool: Arc<PktPool>,
}

impl ClientReader {
    /// Connect to the rings of client port `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ring::RingError`] if any ring is missing.
    pub fn new(
        registry: &RingRegistry,
        id: u32,
        pool: Arc<PktPool>,
    ) -> Result<ClientReader, ring::RingError> {
        Ok(ClientReader {
            rx: registry.lookup(&ring::names::client_rx_ring(id))?,
            free: registry.lookup(&ring::names::client_free_ring(id))?,
            alloc: registry.lookup(&ring::names::client_alloc_ring(id))?,
            pool,
        })
    }

    /// Build a reader over explicit rings, e.g. the per-worker packet port
    /// fed by the controller.
    #[must_use]
    pub fn with_rings(
        rx: Arc<Ring>,
        free: Arc<Ring>,
        alloc: Arc<Ring>,
        pool: Arc<PktPool>,
    ) -> ClientReader {
        ClientReader {
            rx,
            free,
            alloc,
            pool,
        }
    }

    fn drain_free(&self) {
        let mut handles = [0u32; FREE_BURST];
        let n = self.free.dequeue_burst(&mut handles);
        if n > 0 {
            debug!("client port: freeing {n} peer buffers");
        }
        for &raw in &handles[..n] {
            // SAFETY: the peer surrendered ownership by enqueueing to `free`.
            let pkt = unsafe { Pkt::from_raw(raw) };
            self.pool.free(pkt);
        }
    }

    fn top_up_alloc(&self) {
        let space = self.alloc.free_count() as usize;
        if space == 0 {
            return;
        }
        let want = space.min(ALLOC_BURST);
        let mut handles = [0u32; ALLOC_BURST];
        let mut got = 0;
        for slot in handles.iter_mut().take(want) {
            match self.pool.alloc() {
                Some(pkt) => {
                    *slot = pkt.into_raw();
                    got += 1;
                }
                None => break,
            }
        }
        let pushed = self.alloc.enqueue_burst(&handles[..got]);
        if pushed < got {
            warn!(
                "client port: alloc ring rejected {} buffers, freeing",
                got - pushed
            );
            for &raw in &handles[pushed..got] {
                // SAFETY: these handles never reached the peer.
                let pkt = unsafe { Pkt::from_raw(raw) };
                self.pool.free(pkt);
            }
        }
    }
}

impl PacketReader for ClientReader {
    fn rx(&mut self, burst: &mut RxBurst) -> usize {
        // Obligations first: return the peer's dead buffers to the slab and
        // keep its allocation ring near full.
        self.drain_free();
        self.top_up_alloc();

        let mut handles = [0u32; crate::RX_BURST];
        let want = burst.remaining_capacity().min(handles.len());
        let n = self.rx.dequeue_burst(&mut handles[..want]);
        for &raw in &handles[..n] {
            // SAFETY: the peer surrendered ownership by enqueueing to `rx`.
            burst.push(unsafe { Pkt::from_raw(raw) });
        }
        n
    }
}

/// Writer half of a client port (also used for the exception port).
pub struct ClientWriter {
    tx: Arc<Ring>,
    pool: Arc<PktPool>,
    stats: SharedStats,
    sink: TxSink,
    buf: Vec<u32>,
    tx_burst_sz: usize,
    exhausted_retries: bool,
}

impl ClientWriter {
    /// Connect to the `tx` ring of client port `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`ring::RingError`] if the ring is missing.
    pub fn new(
        registry: &RingRegistry,
        id: u32,
        pool: Arc<PktPool>,
        stats: SharedStats,
        sink: TxSink,
    ) -> Result<ClientWriter, ring::RingError> {
        Self::with_ring(
            registry.lookup(&ring::names::client_tx_ring(id))?,
            pool,
            stats,
            sink,
            TX_BURST_SIZE,
        )
    }

    /// Build a writer over an explicit ring, e.g. the per-worker exception
    /// ring.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible to match the other constructors.
    pub fn with_ring(
        tx: Arc<Ring>,
        pool: Arc<PktPool>,
        stats: SharedStats,
        sink: TxSink,
        tx_burst_sz: usize,
    ) -> Result<ClientWriter, ring::RingError> {
        Ok(ClientWriter {
            tx,
            pool,
            stats,
            sink,
            buf: Vec::with_capacity(tx_burst_sz.max(1)),
            tx_burst_sz: tx_burst_sz.max(1),
            exhausted_retries: false,
        })
    }

    fn send_burst(&mut self) {
        let need = self.buf.len() as u32;
        if need == 0 {
            return;
        }
        // If the ring is full, wait and retry to avoid packet loss.
        let mut retry = 0;
        while self.tx.free_count() < need && retry < TX_RETRIES {
            crate::spin_delay(TX_RETRY_DELAY);
            retry += 1;
        }
        if retry == TX_RETRIES && self.tx.free_count() < need {
            if !self.exhausted_retries {
                warn!(
                    "client port: {TX_RETRIES} retries exhausted, tx ring {} still lacks {} slots",
                    self.tx.name(),
                    need - self.tx.free_count()
                );
            }
            self.exhausted_retries = true;
        } else {
            self.exhausted_retries = false;
        }

        let sent = self.tx.enqueue_burst(&self.buf);
        let cell = self.sink.cell(&self.stats);
        cell.tx_add(sent as u64);
        let dropped = self.buf.len() - sent;
        if dropped > 0 {
            cell.tx_drop_add(dropped as u64);
            for &raw in &self.buf[sent..] {
                // SAFETY: these handles never reached the peer.
                let pkt = unsafe { Pkt::from_raw(raw) };
                self.pool.free(pkt);
            }
        }
        self.buf.clear();
    }
}

impl PacketWriter for ClientWriter {
    fn tx(&mut self, pkt: Pkt) {
        self.buf.push(pkt.into_raw());
        if self.buf.len() >= self.tx_burst_sz {
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

    fn pool() -> Arc<PktPool> {
        Arc::new(PktPool::new("client_test_pool", 64).unwrap())
    }

    fn setup(id: u32) -> (RingRegistry, Arc<PktPool>) {
        let registry = RingRegistry::new();
        ensure_rings(&registry, id).unwrap();
        (registry, pool())
    }

    #[test]
    fn reader_fulfils_the_three_obligations() {
        let (registry, pool) = setup(16);
        let mut reader = ClientReader::new(&registry, 16, Arc::clone(&pool)).unwrap();

        // Peer returned two buffers on `free` and sent one frame on `rx`.
        let free_ring = registry.lookup(&ring::names::client_free_ring(16)).unwrap();
        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        free_ring.enqueue(a.into_raw()).unwrap();
        free_ring.enqueue(b.into_raw()).unwrap();

        let rx_ring = registry.lookup(&ring::names::client_rx_ring(16)).unwrap();
        let mut sent = pool.alloc().unwrap();
        pool.get_mut(&mut sent).set_data(&[7; 60]).unwrap();
        rx_ring.enqueue(sent.into_raw()).unwrap();

        let before = pool.available();
        let mut burst = RxBurst::new();
        assert_eq!(reader.rx(&mut burst), 1);
        assert_eq!(burst.len(), 1);
        assert_eq!(pool.get(&burst[0]).data(), &[7u8; 60][..]);

        // Free-ring buffers went back to the slab; the alloc ring was
        // topped up from it.
        let alloc_ring = registry
            .lookup(&ring::names::client_alloc_ring(16))
            .unwrap();
        let topped_up = alloc_ring.count();
        assert!(topped_up > 0);
        assert!(topped_up as usize <= ALLOC_BURST);
        // 2 freed, 1 dequeued to us, `topped_up` handed to the peer.
        assert_eq!(pool.available(), before + 2 - topped_up);

        pool.free(burst.pop().unwrap());
    }

    #[test]
    fn writer_batches_to_burst_size() {
        let (registry, pool) = setup(17);
        let stats = Arc::new(StatsTable::new(crate::MAX_VPORTS, 1));
        let mut writer = ClientWriter::new(
            &registry,
            17,
            Arc::clone(&pool),
            Arc::clone(&stats),
            TxSink::Vport {
                port: 17,
                worker: 0,
            },
        )
        .unwrap();

        let tx_ring = registry.lookup(&ring::names::client_tx_ring(17)).unwrap();
        for _ in 0..TX_BURST_SIZE - 1 {
            writer.tx(pool.alloc().unwrap());
        }
        assert_eq!(tx_ring.count(), 0); // still batched
        writer.tx(pool.alloc().unwrap());
        assert_eq!(tx_ring.count() as usize, TX_BURST_SIZE);

        writer.tx(pool.alloc().unwrap());
        writer.flush();
        assert_eq!(tx_ring.count() as usize, TX_BURST_SIZE + 1);
        assert_eq!(
            stats.vport(17, 0).get().tx,
            (TX_BURST_SIZE + 1) as u64
        );
    }

    #[test]
    fn writer_backpressure_frees_the_shortfall() {
        let registry = RingRegistry::new();
        // A tiny tx ring so the burst cannot fit.
        let tx = registry
            .create(&RingParams {
                name: "tiny_tx".into(),
                size: 4,
                mode: SyncModel::SPSC,
            })
            .unwrap();
        let pool = pool();
        let stats = Arc::new(StatsTable::new(crate::MAX_VPORTS, 1));
        let mut writer = ClientWriter::with_ring(
            tx,
            Arc::clone(&pool),
            Arc::clone(&stats),
            TxSink::Vport {
                port: 20,
                worker: 0,
            },
            8,
        )
        .unwrap();

        let before = pool.available();
        for _ in 0..8 {
            writer.tx(pool.alloc().unwrap());
        }
        let cell = stats.vport(20, 0).get();
        assert_eq!(cell.tx, 4);
        assert_eq!(cell.tx_drop, 4);
        // The four dropped buffers went back to the slab.
        assert_eq!(pool.available(), before - 4);
    }
}
