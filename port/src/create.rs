// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Kind-dispatched reader/writer construction.

use std::sync::Arc;

use net::PktPool;
use ring::RingRegistry;

use crate::bridge::{BridgeReader, BridgeWriter};
use crate::client::{ClientReader, ClientWriter};
use crate::phy::{PhyReader, PhyWriter};
use crate::traits::{PacketReader, PacketWriter, SharedStats, TxSink};
use crate::veth::{VethReader, VethWriter};
use crate::vhost::{VhostReader, VhostWriter};
use crate::vport::VportTable;
use crate::{PortError, PortKind};

/// Build the reader adapter for `id` on `worker`.
///
/// # Errors
///
/// Returns [`PortError::NoDevice`] when a veth/phy port has no attached
/// device, or a ring lookup failure for ring-backed kinds.
pub fn create_reader(
    table: &VportTable,
    registry: &RingRegistry,
    pool: &Arc<PktPool>,
    stats: &SharedStats,
    id: u32,
    worker: usize,
) -> Result<Box<dyn PacketReader>, PortError> {
    let port = table.port(id)?;
    match port.kind() {
        PortKind::Client => Ok(Box::new(ClientReader::new(
            registry,
            id,
            Arc::clone(pool),
        )?)),
        PortKind::Vhost => Ok(Box::new(VhostReader::new(
            registry,
            id,
            port.attached_handle(),
        )?)),
        PortKind::Veth => {
            let shared = port.tap_shared().ok_or(PortError::NoDevice(id))?;
            Ok(Box::new(VethReader::new(
                shared,
                Arc::clone(pool),
                Arc::clone(stats),
                id,
                worker,
            )))
        }
        PortKind::Phy => {
            let dev = port.phy_dev().ok_or(PortError::NoDevice(id))?;
            Ok(Box::new(PhyReader::new(
                dev.rx_queue(worker),
                Arc::clone(pool),
                Arc::clone(stats),
                id,
                worker,
            )))
        }
        PortKind::Bridge => Ok(Box::new(BridgeReader)),
    }
}

/// Build the writer adapter for `id` on `worker`.
///
/// # Errors
///
/// Returns [`PortError::NoDevice`] when a veth/phy port has no attached
/// device, or a ring lookup failure for ring-backed kinds.
pub fn create_writer(
    table: &VportTable,
    registry: &RingRegistry,
    pool: &Arc<PktPool>,
    stats: &SharedStats,
    id: u32,
    worker: usize,
) -> Result<Box<dyn PacketWriter>, PortError> {
    let port = table.port(id)?;
    let sink = TxSink::Vport { port: id, worker };
    match port.kind() {
        PortKind::Client => Ok(Box::new(ClientWriter::new(
            registry,
            id,
            Arc::clone(pool),
            Arc::clone(stats),
            sink,
        )?)),
        PortKind::Vhost => Ok(Box::new(VhostWriter::new(
            registry,
            id,
            port.attached_handle(),
            Arc::clone(pool),
            Arc::clone(stats),
            sink,
        )?)),
        PortKind::Veth => {
            let shared = port.tap_shared().ok_or(PortError::NoDevice(id))?;
            Ok(Box::new(VethWriter::new(
                shared,
                Arc::clone(pool),
                Arc::clone(stats),
                sink,
            )))
        }
        PortKind::Phy => {
            let dev = port.phy_dev().ok_or(PortError::NoDevice(id))?;
            Ok(Box::new(PhyWriter::new(
                dev.tx_queue(worker),
                Arc::clone(pool),
                Arc::clone(stats),
                sink,
            )))
        }
        PortKind::Bridge => Ok(Box::new(BridgeWriter::new(
            Arc::clone(pool),
            Arc::clone(stats),
            sink,
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use stats::StatsTable;

    #[test]
    fn ring_backed_kinds_construct_and_device_kinds_demand_a_device() {
        let table = VportTable::new(0x1);
        let registry = RingRegistry::new();
        let pool = Arc::new(PktPool::new("create_test_pool", 8).unwrap());
        let stats: SharedStats = Arc::new(StatsTable::new(crate::MAX_VPORTS, 1));

        let client_id = PortKind::Client.first_id();
        crate::client::ensure_rings(&registry, client_id).unwrap();
        assert!(create_reader(&table, &registry, &pool, &stats, client_id, 0).is_ok());
        assert!(create_writer(&table, &registry, &pool, &stats, client_id, 0).is_ok());

        let vhost_id = PortKind::Vhost.first_id();
        crate::vhost::ensure_rings(&registry, vhost_id).unwrap();
        assert!(create_reader(&table, &registry, &pool, &stats, vhost_id, 0).is_ok());

        let veth_id = PortKind::Veth.first_id();
        assert!(matches!(
            create_reader(&table, &registry, &pool, &stats, veth_id, 0),
            Err(PortError::NoDevice(_))
        ));
        let tap = Arc::new(crate::veth::LoopbackTap::new());
        table
            .attach_tap(
                veth_id,
                Arc::new(crate::veth::TapShared::new(tap as Arc<dyn crate::veth::TapDevice>)),
            )
            .unwrap();
        assert!(create_reader(&table, &registry, &pool, &stats, veth_id, 0).is_ok());
        assert!(create_writer(&table, &registry, &pool, &stats, veth_id, 0).is_ok());

        assert!(matches!(
            create_writer(&table, &registry, &pool, &stats, 0, 0),
            Err(PortError::NoDevice(0))
        ));
        table
            .attach_phy(0, Arc::new(crate::phy::LoopbackDev::new()))
            .unwrap();
        assert!(create_writer(&table, &registry, &pool, &stats, 0, 0).is_ok());
    }
}
