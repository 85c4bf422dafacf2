// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Datapath counters.
//!
//! One cache-line-aligned counter cell exists per (port, worker), plus one
//! data-plane and one control-plane cell per worker for traffic exchanged
//! with the controller.  Increments are relaxed, worker-local writes on the
//! fast path; reads sum across workers without locks.  A reader may observe
//! a transiently inconsistent total, but every counter is monotonic between
//! explicit clears.

#![deny(clippy::all, clippy::pedantic)]

use core::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// A plain counter snapshot, as carried in VPORT_GET replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    /// Packets received.
    pub rx: u64,
    /// Packets transmitted.
    pub tx: u64,
    /// Packets dropped on receive.
    pub rx_drop: u64,
    /// Packets dropped on transmit.
    pub tx_drop: u64,
    /// Ring overruns.
    pub overrun: u64,
}

impl PortStats {
    fn accumulate(&mut self, other: &PortStats) {
        self.rx += other.rx;
        self.tx += other.tx;
        self.rx_drop += other.rx_drop;
        self.tx_drop += other.tx_drop;
        self.overrun += other.overrun;
    }

    #[must_use]
    fn is_zero(&self) -> bool {
        *self == PortStats::default()
    }
}

/// One worker's counters for one port (or one of the global pairs).
/// Cache-line aligned so that workers never share a line.
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct StatsCell {
    rx: AtomicU64,
    tx: AtomicU64,
    rx_drop: AtomicU64,
    tx_drop: AtomicU64,
    overrun: AtomicU64,
}

impl StatsCell {
    pub fn rx_add(&self, n: u64) {
        self.rx.fetch_add(n, Ordering::Relaxed);
    }

    pub fn tx_add(&self, n: u64) {
        self.tx.fetch_add(n, Ordering::Relaxed);
    }

    pub fn rx_drop_add(&self, n: u64) {
        self.rx_drop.fetch_add(n, Ordering::Relaxed);
    }

    pub fn tx_drop_add(&self, n: u64) {
        self.tx_drop.fetch_add(n, Ordering::Relaxed);
    }

    pub fn overrun_add(&self, n: u64) {
        self.overrun.fetch_add(n, Ordering::Relaxed);
    }

    /// Snapshot this cell.
    #[must_use]
    pub fn get(&self) -> PortStats {
        PortStats {
            rx: self.rx.load(Ordering::Relaxed),
            tx: self.tx.load(Ordering::Relaxed),
            rx_drop: self.rx_drop.load(Ordering::Relaxed),
            tx_drop: self.tx_drop.load(Ordering::Relaxed),
            overrun: self.overrun.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.rx.store(0, Ordering::Relaxed);
        self.tx.store(0, Ordering::Relaxed);
        self.rx_drop.store(0, Ordering::Relaxed);
        self.tx_drop.store(0, Ordering::Relaxed);
        self.overrun.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("port id {0} out of range")]
pub struct BadPortId(pub u32);

/// The process-wide counter table.
#[derive(Debug)]
pub struct StatsTable {
    ports: u32,
    workers: usize,
    // ports * workers cells, port-major
    vport: Box<[StatsCell]>,
    data: Box<[StatsCell]>,
    control: Box<[StatsCell]>,
}

impl StatsTable {
    #[must_use]
    pub fn new(ports: u32, workers: usize) -> StatsTable {
        let cells = |n: usize| -> Box<[StatsCell]> {
            (0..n).map(|_| StatsCell::default()).collect()
        };
        StatsTable {
            ports,
            workers,
            vport: cells(ports as usize * workers),
            data: cells(workers),
            control: cells(workers),
        }
    }

    #[must_use]
    pub fn ports(&self) -> u32 {
        self.ports
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// The (port, worker) counter cell.
    ///
    /// # Panics
    ///
    /// Panics if `port` or `worker` is out of range; callers index with
    /// validated ids.
    #[must_use]
    pub fn vport(&self, port: u32, worker: usize) -> &StatsCell {
        assert!(port < self.ports && worker < self.workers);
        &self.vport[port as usize * self.workers + worker]
    }

    /// The per-worker data-plane cell for controller-bound packet traffic.
    #[must_use]
    pub fn data(&self, worker: usize) -> &StatsCell {
        &self.data[worker]
    }

    /// The per-worker control-plane cell for control messages.
    #[must_use]
    pub fn control(&self, worker: usize) -> &StatsCell {
        &self.control[worker]
    }

    /// Sum a port's counters across all workers.
    ///
    /// # Errors
    ///
    /// Returns [`BadPortId`] if `port` is out of range.
    pub fn vport_get(&self, port: u32) -> Result<PortStats, BadPortId> {
        if port >= self.ports {
            return Err(BadPortId(port));
        }
        let mut total = PortStats::default();
        for worker in 0..self.workers {
            total.accumulate(&self.vport(port, worker).get());
        }
        Ok(total)
    }

    /// Clear a port's counters on every worker.
    ///
    /// # Errors
    ///
    /// Returns [`BadPortId`] if `port` is out of range.
    pub fn vport_clear(&self, port: u32) -> Result<(), BadPortId> {
        if port >= self.ports {
            return Err(BadPortId(port));
        }
        for worker in 0..self.workers {
            self.vport(port, worker).clear();
        }
        Ok(())
    }

    /// Sum the data-plane pair across workers.
    #[must_use]
    pub fn data_get(&self) -> PortStats {
        let mut total = PortStats::default();
        for cell in &self.data {
            total.accumulate(&cell.get());
        }
        total
    }

    /// Sum the control-plane pair across workers.
    #[must_use]
    pub fn control_get(&self) -> PortStats {
        let mut total = PortStats::default();
        for cell in &self.control {
            total.accumulate(&cell.get());
        }
        total
    }

    /// Clear everything.
    pub fn clear_all(&self) {
        for cell in self
            .vport
            .iter()
            .chain(self.data.iter())
            .chain(self.control.iter())
        {
            cell.clear();
        }
    }

    /// Log a summary of every port with nonzero counters plus the two
    /// controller-facing pairs.
    pub fn display(&self) {
        info!("-- port          rx          tx     rx_drop     tx_drop     overrun");
        for port in 0..self.ports {
            if let Ok(s) = self.vport_get(port) {
                if s.is_zero() {
                    continue;
                }
                info!(
                    "   {port:4} {:11} {:11} {:11} {:11} {:11}",
                    s.rx, s.tx, s.rx_drop, s.tx_drop, s.overrun
                );
            }
        }
        let d = self.data_get();
        info!(
            "   data {:11} {:11} {:11} {:11} {:11}",
            d.rx, d.tx, d.rx_drop, d.tx_drop, d.overrun
        );
        let c = self.control_get();
        info!(
            "   ctrl {:11} {:11} {:11} {:11} {:11}",
            c.rx, c.tx, c.rx_drop, c.tx_drop, c.overrun
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn summed_reads_and_clear() {
        let table = StatsTable::new(8, 4);
        table.vport(3, 0).rx_add(263);
        table.vport(3, 0).rx_drop_add(737);
        table.vport(3, 0).tx_add(156);
        table.vport(3, 0).tx_drop_add(488);

        let got = table.vport_get(3).unwrap();
        assert_eq!(
            got,
            PortStats {
                rx: 263,
                tx: 156,
                rx_drop: 737,
                tx_drop: 488,
                overrun: 0,
            }
        );

        table.vport_clear(3).unwrap();
        assert_eq!(table.vport_get(3).unwrap(), PortStats::default());
    }

    #[test]
    fn sums_span_workers() {
        let table = StatsTable::new(2, 3);
        table.vport(1, 0).rx_add(1);
        table.vport(1, 1).rx_add(10);
        table.vport(1, 2).rx_add(100);
        assert_eq!(table.vport_get(1).unwrap().rx, 111);
        // the other port is untouched
        assert_eq!(table.vport_get(0).unwrap().rx, 0);
    }

    #[test]
    fn out_of_range_port_is_an_error() {
        let table = StatsTable::new(2, 1);
        assert!(table.vport_get(2).is_err());
        assert!(table.vport_clear(9).is_err());
    }

    #[test]
    fn global_pairs_are_independent() {
        let table = StatsTable::new(1, 2);
        table.data(0).tx_add(5);
        table.data(1).tx_drop_add(2);
        table.control(0).rx_add(7);

        assert_eq!(table.data_get().tx, 5);
        assert_eq!(table.data_get().tx_drop, 2);
        assert_eq!(table.control_get().rx, 7);
        assert_eq!(table.control_get().tx, 0);

        table.clear_all();
        assert_eq!(table.data_get(), PortStats::default());
        assert_eq!(table.control_get(), PortStats::default());
    }
}
