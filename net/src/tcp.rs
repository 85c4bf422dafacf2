// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! TCP header accessors.

use crate::eth::Truncated;
use crate::ipv4::{PROTO_TCP, l4_offset};

/// Mask of the six classic TCP flags (FIN..URG).
pub const FLAGS_MASK: u8 = 0x3F;

const PORTS_LEN: usize = 4;
const FLAGS_OFFSET: usize = 13;

/// Read-only view of a TCP header.
#[derive(Debug, Clone, Copy)]
pub struct Tcp<'a>(&'a [u8]);

impl<'a> Tcp<'a> {
    /// Parse the TCP ports at the start of `bytes`.
    ///
    /// Only the port fields are required; the flags accessor demands the
    /// longer prefix on its own.
    #[must_use]
    pub fn parse(bytes: &'a [u8]) -> Option<Tcp<'a>> {
        (bytes.len() >= PORTS_LEN).then_some(Tcp(bytes))
    }

    /// Source port.
    #[must_use]
    pub fn source(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    /// Destination port.
    #[must_use]
    pub fn destination(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    /// The flags byte, unmasked.
    #[must_use]
    pub fn flags(&self) -> Option<u8> {
        self.0.get(FLAGS_OFFSET).copied()
    }
}

/// Overwrite the TCP ports in place.
///
/// # Errors
///
/// Returns [`Truncated`] if `l4` holds no complete port pair.
pub fn set_ports(l4: &mut [u8], src: u16, dst: u16) -> Result<(), Truncated> {
    if l4.len() < PORTS_LEN {
        return Err(Truncated);
    }
    l4[0..2].copy_from_slice(&src.to_be_bytes());
    l4[2..4].copy_from_slice(&dst.to_be_bytes());
    Ok(())
}

/// The masked TCP flags of `frame`, walking Ethernet, at most one VLAN tag
/// and the IPv4 header.  `None` unless the frame is IPv4 carrying TCP.
#[must_use]
pub fn flags_from_frame(frame: &[u8]) -> Option<u8> {
    let (ether_type, l3) = crate::eth::payload_offset(frame)?;
    if ether_type != crate::eth::ETHER_TYPE_IPV4 {
        return None;
    }
    let ip = crate::ipv4::Ipv4::parse(&frame[l3..])?;
    if ip.protocol() != PROTO_TCP {
        return None;
    }
    let l4 = l4_offset(frame, l3)?;
    let flags = Tcp::parse(&frame[l4..])?.flags()?;
    Some(flags & FLAGS_MASK)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ports_and_flags() {
        let mut l4 = vec![0u8; 20];
        l4[0..2].copy_from_slice(&0x4000u16.to_be_bytes());
        l4[2..4].copy_from_slice(&0x4001u16.to_be_bytes());
        l4[13] = 0x12; // SYN|ACK

        let tcp = Tcp::parse(&l4).unwrap();
        assert_eq!(tcp.source(), 0x4000);
        assert_eq!(tcp.destination(), 0x4001);
        assert_eq!(tcp.flags(), Some(0x12));

        set_ports(&mut l4, 80, 443).unwrap();
        let tcp = Tcp::parse(&l4).unwrap();
        assert_eq!(tcp.source(), 80);
        assert_eq!(tcp.destination(), 443);
    }

    #[test]
    fn flags_from_full_frame() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x01; 6]);
        frame.extend_from_slice(&[0x02; 6]);
        frame.extend_from_slice(&crate::eth::ETHER_TYPE_IPV4.to_be_bytes());
        let mut l3 = vec![0u8; 20];
        l3[0] = 0x45;
        l3[9] = PROTO_TCP;
        frame.extend_from_slice(&l3);
        let mut l4 = vec![0u8; 20];
        l4[13] = 0xFF; // everything, incl. bits above the classic six
        frame.extend_from_slice(&l4);

        assert_eq!(flags_from_frame(&frame), Some(0x3F));
    }

    #[test]
    fn non_tcp_frames_have_no_flags() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0x01; 6]);
        frame.extend_from_slice(&[0x02; 6]);
        frame.extend_from_slice(&crate::eth::ETHER_TYPE_IPV4.to_be_bytes());
        let mut l3 = vec![0u8; 20];
        l3[0] = 0x45;
        l3[9] = crate::ipv4::PROTO_UDP;
        frame.extend_from_slice(&l3);
        frame.extend_from_slice(&[0u8; 8]);

        assert_eq!(flags_from_frame(&frame), None);
    }
}
