// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use ahash::RandomState;

/// IPv4 fragment class of a packet.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FragKind {
    /// Not a fragment.
    #[default]
    None = 0,
    /// First fragment: offset zero, more-fragments set.
    First = 1,
    /// Later fragment: nonzero offset.  L4 fields are not extracted.
    Later = 2,
}

impl TryFrom<u8> for FragKind {
    type Error = u8;
    fn try_from(value: u8) -> Result<FragKind, u8> {
        match value {
            0 => Ok(FragKind::None),
            1 => Ok(FragKind::First),
            2 => Ok(FragKind::Later),
            other => Err(other),
        }
    }
}

/// The exact-match flow key.
///
/// Fields hold the values the extractor observed on the wire, decoded from
/// network byte order; anything not parsed stays zero.  Two keys are equal
/// exactly when their serialized bytes are equal, and both the table hash
/// and the packet signature are computed over [`FlowKey::to_bytes`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowKey {
    /// Worker-local in-port index inside the table; translated to the
    /// external port id only on the control and upcall boundaries.
    pub in_port: u32,
    /// IPv4 source address.
    pub ip_src: u32,
    /// IPv4 destination address.
    pub ip_dst: u32,
    /// Ethernet source address.
    pub eth_src: [u8; 6],
    /// Ethernet destination address.
    pub eth_dst: [u8; 6],
    /// `EtherType`, after unwrapping at most one VLAN tag.
    pub ether_type: u16,
    /// VLAN id (12 bits), zero when untagged.
    pub vlan_id: u16,
    /// L4 source port; ICMP type for ICMP.
    pub l4_src: u16,
    /// L4 destination port; ICMP code for ICMP.
    pub l4_dst: u16,
    /// VLAN priority (3 bits), zero when untagged.
    pub vlan_prio: u8,
    /// IPv4 protocol number.
    pub ip_proto: u8,
    /// Fragment class.
    pub ip_frag: FragKind,
}

/// Serialized key size; the metadata slot and the control wire both carry
/// exactly this many bytes.
pub const KEY_WIRE_SIZE: usize = 36;

impl FlowKey {
    /// Serialize to the fixed wire layout (host endian).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; KEY_WIRE_SIZE] {
        let mut b = [0u8; KEY_WIRE_SIZE];
        b[0..4].copy_from_slice(&self.in_port.to_ne_bytes());
        b[4..8].copy_from_slice(&self.ip_src.to_ne_bytes());
        b[8..12].copy_from_slice(&self.ip_dst.to_ne_bytes());
        b[12..18].copy_from_slice(&self.eth_src);
        b[18..24].copy_from_slice(&self.eth_dst);
        b[24..26].copy_from_slice(&self.ether_type.to_ne_bytes());
        b[26..28].copy_from_slice(&self.vlan_id.to_ne_bytes());
        b[28..30].copy_from_slice(&self.l4_src.to_ne_bytes());
        b[30..32].copy_from_slice(&self.l4_dst.to_ne_bytes());
        b[32] = self.vlan_prio;
        b[33] = self.ip_proto;
        b[34] = self.ip_frag as u8;
        b
    }

    /// Deserialize from the fixed wire layout.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<FlowKey> {
        if bytes.len() < KEY_WIRE_SIZE {
            return None;
        }
        let word = |range: core::ops::Range<usize>| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[range]);
            u32::from_ne_bytes(raw)
        };
        let half = |at: usize| u16::from_ne_bytes([bytes[at], bytes[at + 1]]);
        let mut eth_src = [0u8; 6];
        eth_src.copy_from_slice(&bytes[12..18]);
        let mut eth_dst = [0u8; 6];
        eth_dst.copy_from_slice(&bytes[18..24]);
        Some(FlowKey {
            in_port: word(0..4),
            ip_src: word(4..8),
            ip_dst: word(8..12),
            eth_src,
            eth_dst,
            ether_type: half(24),
            vlan_id: half(26),
            l4_src: half(28),
            l4_dst: half(30),
            vlan_prio: bytes[32],
            ip_proto: bytes[33],
            ip_frag: FragKind::try_from(bytes[34]).ok()?,
        })
    }
}

impl Hash for FlowKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(&self.to_bytes());
    }
}

/// The fixed-seed hasher shared by the flow table and the signature, so that
/// a signature computed on one worker means the same thing on every worker.
pub(crate) fn hasher_state() -> &'static RandomState {
    static HASHER_STATE: OnceLock<RandomState> = OnceLock::new();
    HASHER_STATE.get_or_init(|| RandomState::with_seeds(0, 0, 0, 0))
}

/// 32-bit signature over the serialized key bytes.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // deliberate 64 -> 32 bit fold
pub fn signature(key: &FlowKey) -> u32 {
    hasher_state().hash_one(key.to_bytes()) as u32
}

#[cfg(any(test, feature = "bolero"))]
mod contract {
    use super::{FlowKey, FragKind};
    use bolero::{Driver, TypeGenerator};

    impl TypeGenerator for FragKind {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(match driver.produce::<u8>()? % 3 {
                0 => FragKind::None,
                1 => FragKind::First,
                _ => FragKind::Later,
            })
        }
    }

    impl TypeGenerator for FlowKey {
        fn generate<D: Driver>(driver: &mut D) -> Option<Self> {
            Some(FlowKey {
                in_port: driver.produce()?,
                ip_src: driver.produce()?,
                ip_dst: driver.produce()?,
                eth_src: driver.produce()?,
                eth_dst: driver.produce()?,
                ether_type: driver.produce()?,
                vlan_id: driver.produce()?,
                l4_src: driver.produce()?,
                l4_dst: driver.produce()?,
                vlan_prio: driver.produce()?,
                ip_proto: driver.produce()?,
                ip_frag: FragKind::generate(driver)?,
            })
        }
    }
}
