// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Virtual ports: the process-wide port registry and the per-kind
//! reader/writer adapters that move packet buffers in and out of a worker's
//! pipeline.

#![deny(clippy::all, clippy::pedantic)]

pub mod bridge;
pub mod client;
pub mod create;
pub mod phy;
pub mod traits;
pub mod veth;
pub mod vhost;
pub mod vport;

use std::time::{Duration, Instant};

pub use create::{create_reader, create_writer};
pub use traits::{PacketReader, PacketWriter, RX_BURST, TxSink};
pub use vport::{PortFlags, Vport, VportTable};

/// Number of physical (NIC) ports.  External ids `[0, MAX_PHYPORTS)`.
pub const MAX_PHYPORTS: u32 = 16;
/// Number of shared-memory client ports.
pub const MAX_CLIENTS: u32 = 16;
/// Number of para-virt guest ports.
pub const MAX_VHOSTS: u32 = 16;
/// Number of kernel-tap ports.
pub const MAX_VETHS: u32 = 8;
/// Number of internal bridge ports.
pub const MAX_BRIDGES: u32 = 1;
/// Total port id space; ids at or above this are invalid.
pub const MAX_VPORTS: u32 = MAX_PHYPORTS + MAX_CLIENTS + MAX_VHOSTS + MAX_VETHS + MAX_BRIDGES;

/// Upper bound on pipeline workers.
pub const MAX_WORKERS: usize = 16;

/// Longest accepted port name, in bytes.
pub const MAX_NAME_SIZE: usize = 32;

/// Sentinel for an unbound reader or writer index.
pub const INVALID_INDEX: u32 = u32::MAX;

/// First external id of each virtual port kind.  Order matters: physical
/// ports must start at zero because their ids double as NIC device numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Physical NIC port.
    Phy,
    /// Shared-memory ring port to a co-located process.
    Client,
    /// Para-virtual guest port.
    Vhost,
    /// Kernel tap-style port.
    Veth,
    /// Internal bridge port.
    Bridge,
}

impl PortKind {
    /// First external id of this kind.
    #[must_use]
    pub const fn first_id(self) -> u32 {
        match self {
            PortKind::Phy => 0,
            PortKind::Client => MAX_PHYPORTS,
            PortKind::Vhost => MAX_PHYPORTS + MAX_CLIENTS,
            PortKind::Veth => MAX_PHYPORTS + MAX_CLIENTS + MAX_VHOSTS,
            PortKind::Bridge => MAX_PHYPORTS + MAX_CLIENTS + MAX_VHOSTS + MAX_VETHS,
        }
    }

    /// The kind owning external id `id`.
    #[must_use]
    pub const fn of(id: u32) -> Option<PortKind> {
        if id < PortKind::Client.first_id() {
            Some(PortKind::Phy)
        } else if id < PortKind::Vhost.first_id() {
            Some(PortKind::Client)
        } else if id < PortKind::Veth.first_id() {
            Some(PortKind::Vhost)
        } else if id < PortKind::Bridge.first_id() {
            Some(PortKind::Veth)
        } else if id < MAX_VPORTS {
            Some(PortKind::Bridge)
        } else {
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("port id {0} out of range")]
    InvalidId(u32),
    #[error("physical port {0} not enabled in the portmask")]
    NotInPortmask(u32),
    #[error("invalid port name {0:?}: must be 1..={MAX_NAME_SIZE} ASCII alphanumeric bytes")]
    BadName(String),
    #[error("port {0} has no attached device")]
    NoDevice(u32),
    #[error("port {0} is not bound on this worker")]
    NotBound(u32),
    #[error(transparent)]
    Ring(#[from] ring::RingError),
}

/// Check a port name: nonempty, bounded, ASCII alphanumeric.
///
/// # Errors
///
/// Returns [`PortError::BadName`] otherwise.
pub fn validate_name(name: &str) -> Result<(), PortError> {
    if name.is_empty()
        || name.len() > MAX_NAME_SIZE
        || !name.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(PortError::BadName(name.to_string()));
    }
    Ok(())
}

/// Verify an external port id against the physical portmask.
///
/// Physical ids must have their portmask bit set; other ids only need to be
/// in range.
///
/// # Errors
///
/// Returns [`PortError::NotInPortmask`] or [`PortError::InvalidId`], both of
/// which the control adapter reports as `ENODEV`.
pub fn verify(id: u32, phy_portmask: u64) -> Result<(), PortError> {
    if id < MAX_PHYPORTS {
        if phy_portmask & (1u64 << id) == 0 {
            return Err(PortError::NotInPortmask(id));
        }
        Ok(())
    } else if id < MAX_VPORTS {
        Ok(())
    } else {
        Err(PortError::InvalidId(id))
    }
}

/// Busy-wait for roughly `delay`.  Workers never block, so back-pressure
/// retries spin instead of sleeping.
pub(crate) fn spin_delay(delay: Duration) {
    let end = Instant::now() + delay;
    while Instant::now() < end {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn id_ranges_partition_the_space() {
        assert_eq!(PortKind::of(0), Some(PortKind::Phy));
        assert_eq!(PortKind::of(MAX_PHYPORTS - 1), Some(PortKind::Phy));
        assert_eq!(PortKind::of(MAX_PHYPORTS), Some(PortKind::Client));
        assert_eq!(
            PortKind::of(PortKind::Vhost.first_id()),
            Some(PortKind::Vhost)
        );
        assert_eq!(
            PortKind::of(PortKind::Veth.first_id()),
            Some(PortKind::Veth)
        );
        assert_eq!(
            PortKind::of(PortKind::Bridge.first_id()),
            Some(PortKind::Bridge)
        );
        assert_eq!(PortKind::of(MAX_VPORTS), None);
    }

    #[test]
    fn verify_phy_requires_the_portmask_bit() {
        assert!(verify(0, 0b1).is_ok());
        assert!(matches!(verify(1, 0b1), Err(PortError::NotInPortmask(1))));
        // virtual ports ignore the portmask
        assert!(verify(MAX_PHYPORTS, 0).is_ok());
        assert!(verify(MAX_VPORTS - 1, 0).is_ok());
        assert!(matches!(
            verify(MAX_VPORTS, u64::MAX),
            Err(PortError::InvalidId(_))
        ));
    }

    #[test]
    fn name_rules() {
        assert!(validate_name("client1").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("dash-ed").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_SIZE)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_SIZE + 1)).is_err());
    }
}
