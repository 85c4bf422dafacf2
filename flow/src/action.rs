// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use arrayvec::ArrayVec;

/// Upper bound on the actions attached to one flow entry.
pub const MAX_ACTIONS: usize = 16;

/// An ordered, bounded action list.
pub type ActionList = ArrayVec<Action, MAX_ACTIONS>;

/// One forwarding or rewrite step attached to a flow entry.
///
/// Lists execute left to right.  `Output` transfers buffer ownership to the
/// writer port, so the interpreter clones the buffer first whenever actions
/// remain after an `Output`.  `Drop` is only valid as a single-action list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Emit the packet on the port with this external id.
    Output {
        /// External port id.
        port: u32,
    },
    /// Drop the packet.
    Drop,
    /// Forward the packet to the controller as an upcall.
    ToController,
    /// Remove the outermost VLAN tag.
    PopVlan,
    /// Insert a VLAN tag with this TCI.
    PushVlan {
        /// Tag control information (priority and VLAN id).
        tci: u16,
    },
    /// Rewrite the Ethernet addresses.
    SetEthernet {
        /// New source MAC.
        src: [u8; 6],
        /// New destination MAC.
        dst: [u8; 6],
    },
    /// Rewrite IPv4 addresses, TOS and TTL.
    SetIpv4 {
        /// New source address.
        src: u32,
        /// New destination address.
        dst: u32,
        /// New type-of-service byte.
        tos: u8,
        /// New time-to-live.
        ttl: u8,
    },
    /// Rewrite the TCP ports.
    SetTcp {
        /// New source port.
        src: u16,
        /// New destination port.
        dst: u16,
    },
    /// Rewrite the UDP ports.
    SetUdp {
        /// New source port.
        src: u16,
        /// New destination port.
        dst: u16,
    },
}

impl Action {
    /// Whether this action consumes the buffer on the hit path: `Output`
    /// hands it to a writer port, `Drop` frees it, and `ToController` leaves
    /// it enqueued on the exception writer.  A well-formed list ends with a
    /// consuming action; a header mutation after the last of these would
    /// rewrite a buffer nothing will ever emit.
    #[must_use]
    pub fn consumes_buffer(&self) -> bool {
        matches!(
            self,
            Action::Output { .. } | Action::Drop | Action::ToController
        )
    }
}
