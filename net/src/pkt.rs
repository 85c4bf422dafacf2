// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The slab-resident packet buffer.
//!
//! A [`PktBuf`] is a fixed-capacity scatter unit that lives in a shared
//! buffer pool and travels between components by handle.  Besides the frame
//! bytes it carries a small metadata scratch area used by the classifier:
//! the 32-bit flow signature, the 32-bit in-port index and the extracted
//! flow key, at fixed byte offsets.
//!
//! The frame window moves for exactly two reasons in this datapath: the
//! exception path grows it backwards into the headroom to prepend an upcall
//! header ([`PktBuf::prepend`]), and the packet-injection path shrinks it
//! from the front to strip the controller's record ([`PktBuf::trim_from_start`]).
//! VLAN push/pop reuses the same two moves.

/// Reserved headroom in front of the frame, enough for an upcall header.
pub const PKT_HEADROOM: u16 = 128;
/// Frame data room.
pub const PKT_DATA_ROOM: u16 = 2048;

/// Size of the metadata scratch area.
pub const META_AREA_SIZE: usize = 64;
/// Byte offset of the 32-bit flow signature inside the scratch area.
pub const META_SIG_OFFSET: usize = 0;
/// Byte offset of the 32-bit in-port index inside the scratch area.
pub const META_PORT_OFFSET: usize = 4;
/// Byte offset of the flow key bytes inside the scratch area.
pub const META_KEY_OFFSET: usize = 8;
/// Room available for flow key bytes.
pub const META_KEY_ROOM: usize = META_AREA_SIZE - META_KEY_OFFSET;

const ROOM: usize = (PKT_HEADROOM + PKT_DATA_ROOM) as usize;

/// A pool of packet buffers.
pub type PktPool = ring::Pool<PktBuf>;
/// Exclusive ownership of one pooled packet buffer.
pub type Pkt = ring::Token<PktBuf>;

/// Error growing the frame backwards: the headroom in front of the frame
/// cannot hold the requested header.  The exception path drops the packet
/// and counts a tx-drop when this happens.
#[derive(Debug, thiserror::Error)]
#[error("cannot prepend {needed} bytes, only {available} bytes of headroom left")]
pub struct NotEnoughHeadroom {
    /// Bytes the header needs.
    pub needed: u16,
    /// Headroom remaining in front of the frame.
    pub available: u16,
}

/// Error shrinking the frame from the front: the frame holds fewer bytes
/// than the record being stripped.
#[derive(Debug, thiserror::Error)]
#[error("cannot trim {wanted} bytes from a {len} byte frame")]
pub struct TrimBeyondFrame {
    /// Bytes in the frame.
    pub len: u16,
    /// Bytes asked to be removed.
    pub wanted: u16,
}

/// Error indicating that the frame does not fit the buffer's data room.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
#[error("frame too long for the {PKT_DATA_ROOM} byte data room")]
pub struct FrameTooLong;

/// A fixed-capacity packet buffer.
#[repr(C)]
pub struct PktBuf {
    meta: [u8; META_AREA_SIZE],
    data_off: u16,
    data_len: u16,
    pkt_len: u32,
    seg_count: u8,
    room: [u8; ROOM],
}

impl Default for PktBuf {
    fn default() -> PktBuf {
        PktBuf {
            meta: [0; META_AREA_SIZE],
            data_off: PKT_HEADROOM,
            data_len: 0,
            pkt_len: 0,
            seg_count: 1,
            room: [0; ROOM],
        }
    }
}

impl ring::PoolItem for PktBuf {
    fn reset(&mut self) {
        self.meta = [0; META_AREA_SIZE];
        self.data_off = PKT_HEADROOM;
        self.data_len = 0;
        self.pkt_len = 0;
        self.seg_count = 1;
    }
}

impl PktBuf {
    /// Frame length of this segment.
    #[must_use]
    pub fn data_len(&self) -> u16 {
        self.data_len
    }

    /// Total packet length across segments.
    #[must_use]
    pub fn pkt_len(&self) -> u32 {
        self.pkt_len
    }

    /// Number of segments.  Always 1 for buffers built by this datapath.
    #[must_use]
    pub fn seg_count(&self) -> u8 {
        self.seg_count
    }

    /// Headroom left in front of the frame.
    #[must_use]
    pub fn headroom(&self) -> u16 {
        self.data_off
    }

    /// Frame bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.room[self.data_off as usize..(self.data_off + self.data_len) as usize]
    }

    /// Frame bytes, mutable.
    #[must_use]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.room[self.data_off as usize..(self.data_off + self.data_len) as usize]
    }

    /// Replace the frame with `frame`, restoring the full headroom.
    ///
    /// # Errors
    ///
    /// Returns [`FrameTooLong`] if `frame` exceeds the data room.
    pub fn set_data(&mut self, frame: &[u8]) -> Result<(), FrameTooLong> {
        if frame.len() > PKT_DATA_ROOM as usize {
            return Err(FrameTooLong);
        }
        #[allow(clippy::cast_possible_truncation)] // bounded by PKT_DATA_ROOM
        let len = frame.len() as u16;
        self.data_off = PKT_HEADROOM;
        self.data_len = len;
        self.pkt_len = u32::from(len);
        self.seg_count = 1;
        self.room[PKT_HEADROOM as usize..PKT_HEADROOM as usize + frame.len()]
            .copy_from_slice(frame);
        Ok(())
    }

    /// The whole data room starting at the default frame position, for
    /// device readers that fill the buffer in place.  Pair with
    /// [`PktBuf::set_data_len`].
    #[must_use]
    pub fn frame_room_mut(&mut self) -> &mut [u8] {
        &mut self.room[PKT_HEADROOM as usize..]
    }

    /// Declare `len` bytes at the default frame position as the frame,
    /// restoring the full headroom.
    ///
    /// # Errors
    ///
    /// Returns [`FrameTooLong`] if `len` exceeds the data room.
    pub fn set_data_len(&mut self, len: u16) -> Result<(), FrameTooLong> {
        if len > PKT_DATA_ROOM {
            return Err(FrameTooLong);
        }
        self.data_off = PKT_HEADROOM;
        self.data_len = len;
        self.pkt_len = u32::from(len);
        self.seg_count = 1;
        Ok(())
    }

    /// Grow the frame backwards into the headroom by `len` bytes, making
    /// room for an upcall header or a VLAN tag in front of what is already
    /// there.  The metadata scratch area is untouched; the flow key recorded
    /// there keeps describing the original frame.
    ///
    /// On success the returned slice is the new, longer frame.
    ///
    /// # Errors
    ///
    /// Returns [`NotEnoughHeadroom`] if the headroom cannot hold `len` more
    /// bytes; the buffer is unchanged.
    pub fn prepend(&mut self, len: u16) -> Result<&mut [u8], NotEnoughHeadroom> {
        if self.data_off < len {
            return Err(NotEnoughHeadroom {
                needed: len,
                available: self.data_off,
            });
        }
        self.data_off -= len;
        self.data_len += len;
        self.pkt_len += u32::from(len);
        Ok(self.data_mut())
    }

    /// Shrink the frame from the front by `len` bytes, e.g. to strip the
    /// control record in front of an injected packet or to drop a VLAN tag.
    /// The freed bytes become headroom again.
    ///
    /// # Errors
    ///
    /// Returns [`TrimBeyondFrame`] if the frame holds fewer than `len`
    /// bytes; the buffer is unchanged.
    pub fn trim_from_start(&mut self, len: u16) -> Result<&mut [u8], TrimBeyondFrame> {
        if self.data_len < len {
            return Err(TrimBeyondFrame {
                len: self.data_len,
                wanted: len,
            });
        }
        self.data_off += len;
        self.data_len -= len;
        self.pkt_len -= u32::from(len);
        Ok(self.data_mut())
    }

    /// Collapse the total length onto this segment.  Used before prepending
    /// an upcall header, which discards everything except the data.
    pub fn collapse_to_data(&mut self) {
        self.pkt_len = u32::from(self.data_len);
        self.seg_count = 1;
    }

    /// Copy frame bytes, lengths and metadata from `src`, producing a
    /// single-segment duplicate.
    pub fn clone_from_pkt(&mut self, src: &PktBuf) {
        self.meta = src.meta;
        self.data_off = PKT_HEADROOM;
        self.data_len = src.data_len;
        self.pkt_len = u32::from(src.data_len);
        self.seg_count = 1;
        self.room[PKT_HEADROOM as usize..(PKT_HEADROOM + src.data_len) as usize]
            .copy_from_slice(src.data());
    }

    /// The flow signature metadata slot.
    #[must_use]
    pub fn signature(&self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.meta[META_SIG_OFFSET..META_SIG_OFFSET + 4]);
        u32::from_ne_bytes(raw)
    }

    pub fn set_signature(&mut self, signature: u32) {
        self.meta[META_SIG_OFFSET..META_SIG_OFFSET + 4].copy_from_slice(&signature.to_ne_bytes());
    }

    /// The in-port index metadata slot.
    #[must_use]
    pub fn in_port(&self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.meta[META_PORT_OFFSET..META_PORT_OFFSET + 4]);
        u32::from_ne_bytes(raw)
    }

    pub fn set_in_port(&mut self, in_port: u32) {
        self.meta[META_PORT_OFFSET..META_PORT_OFFSET + 4].copy_from_slice(&in_port.to_ne_bytes());
    }

    /// The flow key metadata slot.
    #[must_use]
    pub fn key_bytes(&self) -> &[u8] {
        &self.meta[META_KEY_OFFSET..]
    }

    /// The flow key metadata slot, mutable.
    #[must_use]
    pub fn key_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.meta[META_KEY_OFFSET..]
    }
}

impl core::fmt::Debug for PktBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PktBuf")
            .field("data_off", &self.data_off)
            .field("data_len", &self.data_len)
            .field("pkt_len", &self.pkt_len)
            .field("seg_count", &self.seg_count)
            .field("signature", &self.signature())
            .field("in_port", &self.in_port())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ring::PoolItem;

    #[test]
    fn set_data_and_windowing() {
        let mut buf = PktBuf::default();
        buf.set_data(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(buf.data(), &[1, 2, 3, 4, 5]);
        assert_eq!(buf.data_len(), 5);
        assert_eq!(buf.pkt_len(), 5);
        assert_eq!(buf.headroom(), PKT_HEADROOM);

        let new = buf.prepend(2).unwrap();
        new[0] = 0xAA;
        new[1] = 0xBB;
        assert_eq!(buf.data(), &[0xAA, 0xBB, 1, 2, 3, 4, 5]);
        assert_eq!(buf.headroom(), PKT_HEADROOM - 2);

        buf.trim_from_start(4).unwrap();
        assert_eq!(buf.data(), &[3, 4, 5]);
        assert_eq!(buf.pkt_len(), 3);
        assert_eq!(buf.headroom(), PKT_HEADROOM + 2);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = PktBuf::default();
        let frame = vec![0u8; PKT_DATA_ROOM as usize + 1];
        assert!(buf.set_data(&frame).is_err());
        assert!(buf.set_data_len(PKT_DATA_ROOM + 1).is_err());
    }

    #[test]
    fn prepend_exhausts_headroom() {
        let mut buf = PktBuf::default();
        buf.set_data(&[0; 8]).unwrap();
        buf.prepend(PKT_HEADROOM).unwrap();
        let err = buf.prepend(1).unwrap_err();
        assert_eq!(err.needed, 1);
        assert_eq!(err.available, 0);
        // the failed prepend left the frame alone
        assert_eq!(buf.data_len(), 8 + PKT_HEADROOM);
    }

    #[test]
    fn trim_beyond_the_frame_is_rejected() {
        let mut buf = PktBuf::default();
        buf.set_data(&[0; 8]).unwrap();
        let err = buf.trim_from_start(9).unwrap_err();
        assert_eq!(err.len, 8);
        assert_eq!(err.wanted, 9);
        assert_eq!(buf.data_len(), 8);
    }

    #[test]
    fn metadata_slots_are_independent() {
        let mut buf = PktBuf::default();
        buf.set_signature(0xDEAD_BEEF);
        buf.set_in_port(7);
        buf.key_bytes_mut()[0] = 0x55;
        assert_eq!(buf.signature(), 0xDEAD_BEEF);
        assert_eq!(buf.in_port(), 7);
        assert_eq!(buf.key_bytes()[0], 0x55);

        buf.reset();
        assert_eq!(buf.signature(), 0);
        assert_eq!(buf.in_port(), 0);
        assert_eq!(buf.key_bytes()[0], 0);
    }

    #[test]
    fn window_moves_leave_the_metadata_alone() {
        let mut buf = PktBuf::default();
        buf.set_data(&[9; 40]).unwrap();
        buf.set_signature(0x1234_5678);
        buf.set_in_port(3);
        buf.key_bytes_mut()[..4].copy_from_slice(&[1, 2, 3, 4]);

        buf.prepend(40).unwrap();
        buf.trim_from_start(60).unwrap();
        assert_eq!(buf.signature(), 0x1234_5678);
        assert_eq!(buf.in_port(), 3);
        assert_eq!(&buf.key_bytes()[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn clone_from_pkt_copies_data_and_meta() {
        let mut src = PktBuf::default();
        src.set_data(&[9, 9, 9]).unwrap();
        src.set_signature(42);
        src.set_in_port(3);

        let mut dst = PktBuf::default();
        dst.clone_from_pkt(&src);
        assert_eq!(dst.data(), &[9, 9, 9]);
        assert_eq!(dst.signature(), 42);
        assert_eq!(dst.in_port(), 3);
        assert_eq!(dst.seg_count(), 1);
        assert_eq!(dst.headroom(), PKT_HEADROOM);
    }
}
