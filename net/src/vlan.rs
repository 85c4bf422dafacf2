// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! 802.1Q VLAN tag accessors and the push/pop rewrites.

use crate::eth::{ETHER_TYPE_VLAN, Truncated};
use crate::pkt::{NotEnoughHeadroom, PktBuf};

/// Length of the VLAN tag that follows the MAC addresses.
pub const HEADER_LEN: usize = 4;
/// Mask of the VLAN id inside the TCI.
pub const VLAN_ID_MASK: u16 = 0x0FFF;
/// Shift of the priority bits inside the TCI.
pub const VLAN_PRIO_SHIFT: u16 = 13;

/// Read-only view of the VLAN tag that follows an Ethernet header.
///
/// The view starts at the TCI, i.e. at `frame[14..]`.
#[derive(Debug, Clone, Copy)]
pub struct Vlan<'a>(&'a [u8]);

impl<'a> Vlan<'a> {
    /// Parse the VLAN tag at the start of `bytes`.
    #[must_use]
    pub fn parse(bytes: &'a [u8]) -> Option<Vlan<'a>> {
        (bytes.len() >= HEADER_LEN).then_some(Vlan(bytes))
    }

    /// The raw tag control information field.
    #[must_use]
    pub fn tci(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    /// VLAN id, the lower 12 TCI bits.
    #[must_use]
    pub fn vlan_id(&self) -> u16 {
        self.tci() & VLAN_ID_MASK
    }

    /// Priority, the upper 3 TCI bits.
    #[must_use]
    pub fn priority(&self) -> u8 {
        #[allow(clippy::cast_possible_truncation)] // 3 bits remain
        {
            (self.tci() >> VLAN_PRIO_SHIFT) as u8
        }
    }

    /// The encapsulated `EtherType`.
    #[must_use]
    pub fn inner_ether_type(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }
}

/// Insert a VLAN tag with the given TCI after the MAC addresses.
///
/// # Errors
///
/// Returns [`NotEnoughHeadroom`] if the buffer cannot grow by the tag size,
/// and [`Truncated`] if no complete Ethernet header is present.
pub fn push(buf: &mut PktBuf, tci: u16) -> Result<(), PushVlanError> {
    if buf.data_len() < crate::eth::HEADER_LEN as u16 {
        return Err(PushVlanError::Truncated(Truncated));
    }
    #[allow(clippy::cast_possible_truncation)]
    let data = buf.prepend(HEADER_LEN as u16)?;
    // The MAC addresses move to the front; the old EtherType stays put and
    // becomes the encapsulated type.
    data.copy_within(HEADER_LEN..HEADER_LEN + 12, 0);
    data[12..14].copy_from_slice(&ETHER_TYPE_VLAN.to_be_bytes());
    data[14..16].copy_from_slice(&tci.to_be_bytes());
    Ok(())
}

/// Remove the VLAN tag after the MAC addresses.
///
/// # Errors
///
/// Returns [`Truncated`] if the frame has no VLAN tag to remove.
pub fn pop(buf: &mut PktBuf) -> Result<(), Truncated> {
    let frame = buf.data();
    if frame.len() < crate::eth::HEADER_LEN + HEADER_LEN {
        return Err(Truncated);
    }
    let eth = crate::eth::Eth::parse(frame).ok_or(Truncated)?;
    if eth.ether_type() != ETHER_TYPE_VLAN {
        return Err(Truncated);
    }
    let data = buf.data_mut();
    // The MAC addresses move back over the tag.
    data.copy_within(0..12, HEADER_LEN);
    #[allow(clippy::cast_possible_truncation)]
    buf.trim_from_start(HEADER_LEN as u16)
        .map_err(|_| Truncated)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum PushVlanError {
    #[error(transparent)]
    Headroom(#[from] NotEnoughHeadroom),
    #[error(transparent)]
    Truncated(#[from] Truncated),
}
