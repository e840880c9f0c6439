//! The connection table record.
//!
//! The record's byte image is normative: it is persisted verbatim and it is
//! shipped on the wire by the read-connection-table response (RDCS). Bit
//! fields use explicit shift and mask constants.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::msg::{Cid, ConnectionHeader, Selector};
use crate::NO_ASSEMBLY;

/// Lifecycle state of a connection record.
#[doc(alias = "IsiConnectionState")]
#[derive(IntoPrimitive, TryFromPrimitive, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Debug)]
#[repr(u8)]
pub enum ConnectionState {
    Unused = 0,
    /// Reserved for an enrollment under negotiation.
    Pending = 1,
    InUse = 2,
    /// In use, and scheduled for a CSMR re-send after a DIDCF.
    TcsmrPending = 3,
}

/// One connection table record.
///
/// A connection wider than [`WIDTH_PER_RECORD`](crate::WIDTH_PER_RECORD)
/// selectors spans multiple records, linked only by their shared connection
/// id; the first record carries offset zero.
#[doc(alias = "IsiConnection")]
#[cfg_attr(
    feature = "zerocopy",
    derive(
        zerocopy_derive::FromZeroes,
        zerocopy_derive::FromBytes,
        zerocopy_derive::AsBytes
    )
)]
#[derive(Default, Clone, Copy, Debug)]
#[repr(C)]
pub struct ConnectionRecord {
    pub header: ConnectionHeader,
    /// Record offset and automatic-enrollment bit, see the constants.
    pub desc: u8,
    /// Local assembly hosting this connection, or [`NO_ASSEMBLY`].
    pub host: u8,
    /// Local assembly enrolled as a member, or [`NO_ASSEMBLY`].
    pub member: u8,
    /// State, extend, csme-seen and width, see the constants.
    pub attributes: u8,
}

impl ConnectionRecord {
    pub const OFFSET_SHIFT: u8 = 2;
    pub const OFFSET_MASK: u8 = 0xfc;
    pub const AUTO_MASK: u8 = 0x01;

    pub const STATE_SHIFT: u8 = 6;
    pub const STATE_MASK: u8 = 0xc0;
    pub const EXTEND_MASK: u8 = 0x20;
    pub const CSME_MASK: u8 = 0x10;
    pub const WIDTH_MASK: u8 = 0x07;

    pub fn state(&self) -> ConnectionState {
        ConnectionState::try_from((self.attributes & Self::STATE_MASK) >> Self::STATE_SHIFT)
            .unwrap_or(ConnectionState::Unused)
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.attributes =
            (self.attributes & !Self::STATE_MASK) | (u8::from(state) << Self::STATE_SHIFT);
    }

    /// Whether the connection extends a prior binding instead of replacing it.
    pub fn extend(&self) -> bool {
        self.attributes & Self::EXTEND_MASK != 0
    }

    pub fn set_extend(&mut self, extend: bool) {
        self.attributes &= !Self::EXTEND_MASK;
        if extend {
            self.attributes |= Self::EXTEND_MASK;
        }
    }

    /// On a host: whether at least one CSME has been seen for this record.
    pub fn csme_seen(&self) -> bool {
        self.attributes & Self::CSME_MASK != 0
    }

    pub fn set_csme_seen(&mut self, seen: bool) {
        self.attributes &= !Self::CSME_MASK;
        if seen {
            self.attributes |= Self::CSME_MASK;
        }
    }

    /// Selectors governed by this record, 1..=4.
    pub fn width(&self) -> u8 {
        self.attributes & Self::WIDTH_MASK
    }

    pub fn set_width(&mut self, width: u8) {
        self.attributes = (self.attributes & !Self::WIDTH_MASK) | (width & Self::WIDTH_MASK);
    }

    /// Offset of this record within its connection, in record units.
    pub fn offset(&self) -> u8 {
        (self.desc & Self::OFFSET_MASK) >> Self::OFFSET_SHIFT
    }

    pub fn automatic(&self) -> bool {
        self.desc & Self::AUTO_MASK != 0
    }

    pub fn set_offset_auto(&mut self, offset: u8, automatic: bool) {
        self.desc = (offset << Self::OFFSET_SHIFT) | u8::from(automatic);
    }

    /// Offset zero, automatic: the record eligible for CSMR reminders.
    pub fn is_automatic_head(&self) -> bool {
        self.desc == Self::AUTO_MASK
    }

    pub fn cid(&self) -> &Cid {
        &self.header.cid
    }

    pub fn selector(&self) -> u16 {
        self.header.selector.get()
    }

    pub fn set_selector(&mut self, selector: u16) {
        self.header.selector = Selector::new(selector);
    }

    pub fn has_local_host(&self) -> bool {
        self.host != NO_ASSEMBLY
    }

    pub fn has_local_member(&self) -> bool {
        self.member != NO_ASSEMBLY
    }

    /// Whether the record refers to `assembly` as host or member.
    pub fn involves(&self, assembly: u8) -> bool {
        self.host == assembly || self.member == assembly
    }
}

#[cfg(test)]
mod tests {
    use core::mem;

    use super::*;

    #[test]
    fn record_size() {
        assert_eq!(mem::size_of::<ConnectionRecord>(), 13);
    }

    #[test]
    fn attributes_round_trip() {
        let mut record = ConnectionRecord::default();
        record.set_state(ConnectionState::Pending);
        record.set_extend(true);
        record.set_csme_seen(true);
        record.set_width(4);
        assert_eq!(record.state(), ConnectionState::Pending);
        assert!(record.extend());
        assert!(record.csme_seen());
        assert_eq!(record.width(), 4);

        record.set_state(ConnectionState::InUse);
        record.set_extend(false);
        assert_eq!(record.state(), ConnectionState::InUse);
        assert!(!record.extend());
        assert!(record.csme_seen());
        assert_eq!(record.width(), 4);
    }

    #[test]
    fn offset_auto() {
        let mut record = ConnectionRecord::default();
        record.set_offset_auto(0, true);
        assert!(record.is_automatic_head());
        record.set_offset_auto(3, true);
        assert_eq!(record.offset(), 3);
        assert!(record.automatic());
        assert!(!record.is_automatic_head());
    }
}
