// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The reader/writer seam between the pipeline and the port kinds.

use arrayvec::ArrayVec;
use net::Pkt;
use stats::{StatsCell, StatsTable};
use std::sync::Arc;

/// Upper bound on one reader visit; the pipeline never asks for more.
pub const RX_BURST: usize = 64;

/// A burst of owned packet buffers.
pub type RxBurst = ArrayVec<Pkt, RX_BURST>;

/// Produces packet buffers from a port.
pub trait PacketReader: Send {
    /// Dequeue up to the burst's remaining capacity.  Returns the number of
    /// buffers appended to `burst`.
    fn rx(&mut self, burst: &mut RxBurst) -> usize;
}

/// Consumes packet buffers towards a port.
///
/// `tx` takes ownership of the buffer (invariant: no dereference after
/// enqueue).  Writers may batch internally; the pipeline calls `flush` at
/// its flush interval and on shutdown.
pub trait PacketWriter: Send {
    /// Queue one buffer for transmit.
    fn tx(&mut self, pkt: Pkt);
    /// Push out any batched buffers.
    fn flush(&mut self);
}

/// Where a writer accounts its tx / tx-drop counters.
#[derive(Debug, Clone)]
pub enum TxSink {
    /// A per-port counter row.
    Vport {
        /// External port id.
        port: u32,
        /// Worker owning the writer.
        worker: usize,
    },
    /// The per-worker data-plane pair (controller-bound traffic).
    DataPlane {
        /// Worker owning the writer.
        worker: usize,
    },
}

impl TxSink {
    pub(crate) fn cell<'s>(&self, stats: &'s StatsTable) -> &'s StatsCell {
        match *self {
            TxSink::Vport { port, worker } => stats.vport(port, worker),
            TxSink::DataPlane { worker } => stats.data(worker),
        }
    }
}

/// Stats handle shared by all writers of a worker.
pub type SharedStats = Arc<StatsTable>;
