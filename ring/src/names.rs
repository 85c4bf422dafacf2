// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ring and pool name templates.
//!
//! These strings are ABI.  The controller and shared-memory peers construct
//! the same names from the worker id or external port id and resolve them
//! through the registry; renaming any template is a wire break.

/// Packet buffer pool name.
pub const PKT_POOL: &str = "swdp_pkt_pool";
/// Control message buffer pool name.
pub const CTRL_POOL: &str = "swdp_ctrl_pool";

/// Controller → worker request ring.
#[must_use]
pub fn request_ring(worker: usize) -> String {
    format!("swdp_request_{worker:02}")
}

/// Worker → controller reply ring (shared, multi-producer).
#[must_use]
pub fn reply_ring() -> String {
    "swdp_reply".to_string()
}

/// Control buffers returned by the controller for the worker to free.
#[must_use]
pub fn control_free_ring(worker: usize) -> String {
    format!("swdp_control_free_{worker:02}")
}

/// Control buffers pre-allocated by the worker for the controller.
#[must_use]
pub fn control_alloc_ring(worker: usize) -> String {
    format!("swdp_control_alloc_{worker:02}")
}

/// Controller-injected packets (PACKET/ACTION) into the worker.
#[must_use]
pub fn packet_ring(worker: usize) -> String {
    format!("swdp_packet_{worker:02}")
}

/// Upcalls (table misses, explicit to-controller actions) out of the worker.
#[must_use]
pub fn exception_ring(worker: usize) -> String {
    format!("swdp_exception_{worker:02}")
}

/// Packet buffers returned by the controller for the worker to free.
#[must_use]
pub fn packet_free_ring(worker: usize) -> String {
    format!("swdp_packet_free_{worker:02}")
}

/// Packet buffers pre-allocated by the worker for the controller.
#[must_use]
pub fn packet_alloc_ring(worker: usize) -> String {
    format!("swdp_packet_alloc_{worker:02}")
}

/// Shared-memory client port ingress ring (peer → datapath).
#[must_use]
pub fn client_rx_ring(port: u32) -> String {
    format!("swdp_client_rx_{port:02}")
}

/// Shared-memory client port egress ring (datapath → peer).
#[must_use]
pub fn client_tx_ring(port: u32) -> String {
    format!("swdp_client_tx_{port:02}")
}

/// Buffers the peer no longer needs; drained and freed by the datapath.
#[must_use]
pub fn client_free_ring(port: u32) -> String {
    format!("swdp_client_free_{port:02}")
}

/// Buffers pre-allocated by the datapath for the peer.
#[must_use]
pub fn client_alloc_ring(port: u32) -> String {
    format!("swdp_client_alloc_{port:02}")
}

/// Para-virt guest port ingress ring.
#[must_use]
pub fn vhost_rx_ring(port: u32) -> String {
    format!("swdp_vhost_rx_{port:02}")
}

/// Para-virt guest port egress ring.
#[must_use]
pub fn vhost_tx_ring(port: u32) -> String {
    format!("swdp_vhost_tx_{port:02}")
}
