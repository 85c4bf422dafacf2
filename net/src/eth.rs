// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Ethernet header accessors.

/// Error for header reads and writes against a frame that is too short.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
#[error("frame too short for header access")]
pub struct Truncated;

/// Length of an Ethernet header without a VLAN tag.
pub const HEADER_LEN: usize = 14;
/// `EtherType` of IPv4.
pub const ETHER_TYPE_IPV4: u16 = 0x0800;
/// `EtherType` of an 802.1Q VLAN tag.
pub const ETHER_TYPE_VLAN: u16 = 0x8100;

/// Read-only view of the Ethernet header at the start of `frame`.
#[derive(Debug, Clone, Copy)]
pub struct Eth<'a>(&'a [u8]);

impl<'a> Eth<'a> {
    /// Parse the Ethernet header at the start of `frame`.
    #[must_use]
    pub fn parse(frame: &'a [u8]) -> Option<Eth<'a>> {
        (frame.len() >= HEADER_LEN).then_some(Eth(frame))
    }

    /// Destination MAC address.
    #[must_use]
    pub fn destination(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.0[0..6]);
        mac
    }

    /// Source MAC address.
    #[must_use]
    pub fn source(&self) -> [u8; 6] {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.0[6..12]);
        mac
    }

    /// The `EtherType` field.
    #[must_use]
    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes([self.0[12], self.0[13]])
    }
}

/// Overwrite the source and destination MAC addresses in place.
///
/// # Errors
///
/// Returns [`Truncated`] if the frame has no complete Ethernet header.
pub fn set_addresses(frame: &mut [u8], src: [u8; 6], dst: [u8; 6]) -> Result<(), Truncated> {
    if frame.len() < HEADER_LEN {
        return Err(Truncated);
    }
    frame[0..6].copy_from_slice(&dst);
    frame[6..12].copy_from_slice(&src);
    Ok(())
}

/// Resolve the L3 payload: the `EtherType` after unwrapping at most one VLAN
/// tag, and the byte offset at which the L3 header starts.
#[must_use]
pub fn payload_offset(frame: &[u8]) -> Option<(u16, usize)> {
    let eth = Eth::parse(frame)?;
    let ether_type = eth.ether_type();
    if ether_type == ETHER_TYPE_VLAN {
        let vlan = crate::vlan::Vlan::parse(&frame[HEADER_LEN..])?;
        Some((vlan.inner_ether_type(), HEADER_LEN + crate::vlan::HEADER_LEN))
    } else {
        Some((ether_type, HEADER_LEN))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_and_rewrite() {
        let mut frame = vec![
            0x01, 0x01, 0x01, 0x01, 0x01, 0x01, // dst
            0x02, 0x02, 0x02, 0x02, 0x02, 0x02, // src
            0x08, 0x00, // IPv4
        ];
        let eth = Eth::parse(&frame).unwrap();
        assert_eq!(eth.destination(), [0x01; 6]);
        assert_eq!(eth.source(), [0x02; 6]);
        assert_eq!(eth.ether_type(), ETHER_TYPE_IPV4);

        set_addresses(&mut frame, [0xAA; 6], [0xBB; 6]).unwrap();
        let eth = Eth::parse(&frame).unwrap();
        assert_eq!(eth.source(), [0xAA; 6]);
        assert_eq!(eth.destination(), [0xBB; 6]);
    }

    #[test]
    fn short_frame_is_rejected() {
        assert!(Eth::parse(&[0u8; 13]).is_none());
        assert!(set_addresses(&mut [0u8; 13], [0; 6], [0; 6]).is_err());
    }
}
