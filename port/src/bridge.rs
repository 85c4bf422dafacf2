// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Internal bridge ports.
//!
//! A bridge port is the controller's anchor for the switch-internal
//! interface; no traffic originates from it inside the datapath and frames
//! sent towards it terminate here.

use std::sync::Arc;

use net::{Pkt, PktPool};

use crate::traits::{PacketReader, PacketWriter, RxBurst, SharedStats, TxSink};

/// Reader half of a bridge port; never produces.
#[derive(Debug, Default)]
pub struct BridgeReader;

impl PacketReader for BridgeReader {
    fn rx(&mut self, _burst: &mut RxBurst) -> usize {
        0
    }
}

/// Writer half of a bridge port; consumes and frees.
pub struct BridgeWriter {
    pool: Arc<PktPool>,
    stats: SharedStats,
    sink: TxSink,
}

impl BridgeWriter {
    #[must_use]
    pub fn new(pool: Arc<PktPool>, stats: SharedStats, sink: TxSink) -> BridgeWriter {
        BridgeWriter { pool, stats, sink }
    }
}

impl PacketWriter for BridgeWriter {
    fn tx(&mut self, pkt: Pkt) {
        self.sink.cell(&self.stats).tx_add(1);
        self.pool.free(pkt);
    }

    fn flush(&mut self) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use stats::StatsTable;

    #[test]
    fn reader_is_silent_and_writer_terminates() {
        let pool = Arc::new(PktPool::new("bridge_test_pool", 4).unwrap());
        let stats = Arc::new(StatsTable::new(crate::MAX_VPORTS, 1));

        let mut reader = BridgeReader;
        let mut burst = RxBurst::new();
        assert_eq!(reader.rx(&mut burst), 0);

        let bridge_id = crate::PortKind::Bridge.first_id();
        let mut writer = BridgeWriter::new(
            Arc::clone(&pool),
            Arc::clone(&stats),
            TxSink::Vport {
                port: bridge_id,
                worker: 0,
            },
        );
        writer.tx(pool.alloc().unwrap());
        assert_eq!(stats.vport(bridge_id, 0).get().tx, 1);
        assert_eq!(pool.available(), 4);
    }
}
