//! ISI wire structures.
//!
//! All structures are little-endian wire format. Bit fields within a byte
//! are expressed through explicit shift and mask constants on the carrying
//! structure; the layout is normative and must not be left to the compiler.
//!
//! The cancel/confirm/accept/delete messages (CSMX, CSMC, CSME, CSMD) carry
//! a bare [`Cid`] and have no dedicated structure.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{UniqueId, DOMAIN_ID_LEN, SELECTOR_MASK, UNIQUE_ID_LEN};

/// A 14-bit NV selector in little-endian wire order.
///
/// Selectors appear at odd offsets inside ISI structures; this type keeps
/// byte alignment so the carrying structures stay free of padding.
#[cfg_attr(
    feature = "zerocopy",
    derive(
        zerocopy_derive::FromZeroes,
        zerocopy_derive::FromBytes,
        zerocopy_derive::AsBytes
    )
)]
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub struct Selector([u8; 2]);

impl Selector {
    pub const fn new(value: u16) -> Self {
        Self((value & SELECTOR_MASK).to_le_bytes())
    }

    pub const fn get(self) -> u16 {
        u16::from_le_bytes(self.0)
    }
}

impl From<u16> for Selector {
    fn from(value: u16) -> Self {
        Self::new(value)
    }
}

impl From<Selector> for u16 {
    fn from(value: Selector) -> Self {
        value.get()
    }
}

/// A connection id: the originating host's unique id plus a running serial.
///
/// Network-wide unique for a given connection.
#[doc(alias = "IsiCid")]
#[cfg_attr(
    feature = "zerocopy",
    derive(
        zerocopy_derive::FromZeroes,
        zerocopy_derive::FromBytes,
        zerocopy_derive::AsBytes
    )
)]
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
#[repr(C)]
pub struct Cid {
    pub unique_id: UniqueId,
    pub serial: u8,
}

/// The leading fields shared by CSMO/CSMA/CSMR, CSMI and connection records.
#[doc(alias = "IsiConnectionHeader")]
#[cfg_attr(
    feature = "zerocopy",
    derive(
        zerocopy_derive::FromZeroes,
        zerocopy_derive::FromBytes,
        zerocopy_derive::AsBytes
    )
)]
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
#[repr(C)]
pub struct ConnectionHeader {
    pub cid: Cid,
    /// Starting NV selector.
    pub selector: Selector,
}

/// Device resource usage message.
#[doc(alias = "IsiDrum")]
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
pub struct Drum {
    /// Domain id length in the three least significant bits.
    pub attributes: u8,
    pub domain_id: [u8; DOMAIN_ID_LEN],
    pub subnet: u8,
    pub node: u8,
    pub unique_id: UniqueId,
    /// Non-unique device id feeding the DAS device-count estimator.
    pub nuid: u8,
    pub channel_type: u8,
    /// Only transmitted by DRUMEX.
    pub extended: DrumExtended,
}

/// The DRUMEX extension fields.
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
pub struct DrumExtended {
    pub device_class: [u8; 2],
    pub usage: u8,
}

impl Drum {
    pub const DID_LENGTH_MASK: u8 = 0x07;

    pub fn did_length(&self) -> usize {
        usize::from(self.attributes & Self::DID_LENGTH_MASK)
    }

    pub fn set_did_length(&mut self, len: usize) {
        self.attributes = (self.attributes & !Self::DID_LENGTH_MASK) | (len as u8 & Self::DID_LENGTH_MASK);
    }
}

/// Direction constraint carried in an enrollment invitation.
#[doc(alias = "IsiDirection")]
#[derive(IntoPrimitive, TryFromPrimitive, PartialEq, Eq, Clone, Copy, Debug)]
#[repr(u8)]
pub enum Direction {
    Output = 0,
    Input = 1,
    Any = 2,
    Various = 3,
}

/// The application-defined portion of an enrollment invitation.
#[doc(alias = "IsiCsmoData")]
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
pub struct CsmoData {
    /// Group id this connection binds to.
    pub group: u8,
    /// Direction and width, see the shift/mask constants.
    pub attributes1: u8,
    /// NV type of the offered connection, 0 if untyped.
    pub nv_type: u8,
    /// Application-defined variant, 0 for standard enrollment.
    pub variant: u8,
    /// Only transmitted by the EX message forms.
    pub extended: CsmoExtended,
}

/// The CSMOEX/CSMAEX/CSMREX extension fields.
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
pub struct CsmoExtended {
    /// Acknowledged, poll and scope bits, see the shift/mask constants.
    pub attributes2: u8,
    /// The offering application's program id prefix.
    pub application: [u8; UNIQUE_ID_LEN],
    /// Member count per assembly; 1 is implied on the short forms.
    pub member: u8,
}

impl CsmoData {
    pub const DIRECTION_SHIFT: u8 = 6;
    pub const DIRECTION_MASK: u8 = 0xc0;
    pub const WIDTH_MASK: u8 = 0x3f;

    pub fn direction(&self) -> Direction {
        Direction::try_from((self.attributes1 & Self::DIRECTION_MASK) >> Self::DIRECTION_SHIFT)
            .unwrap_or(Direction::Any)
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.attributes1 = (self.attributes1 & !Self::DIRECTION_MASK)
            | (u8::from(direction) << Self::DIRECTION_SHIFT);
    }

    /// Connection width in selectors.
    pub fn width(&self) -> u8 {
        self.attributes1 & Self::WIDTH_MASK
    }

    pub fn set_width(&mut self, width: u8) {
        self.attributes1 = (self.attributes1 & !Self::WIDTH_MASK) | (width & Self::WIDTH_MASK);
    }
}

impl CsmoExtended {
    pub const ACKNOWLEDGED_MASK: u8 = 0x80;
    pub const POLL_MASK: u8 = 0x40;
    pub const SCOPE_MASK: u8 = 0x3f;

    pub fn acknowledged(&self) -> bool {
        self.attributes2 & Self::ACKNOWLEDGED_MASK != 0
    }

    pub fn poll(&self) -> bool {
        self.attributes2 & Self::POLL_MASK != 0
    }

    pub fn scope(&self) -> u8 {
        self.attributes2 & Self::SCOPE_MASK
    }
}

/// Enrollment invitation (CSMO/CSMA/CSMR and their EX forms).
#[doc(alias = "IsiCsmo")]
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
pub struct Csmo {
    pub header: ConnectionHeader,
    pub data: CsmoData,
}

/// Domain id request, broadcast on the secondary domain.
#[doc(alias = "IsiDidrq")]
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
pub struct Didrq {
    pub unique_id: UniqueId,
    pub nuid: u8,
}

/// Domain id response and confirmation (DIDRM, DIDCF).
#[doc(alias = "IsiDidrm")]
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
pub struct Didrm {
    /// Domain id length in the three least significant bits.
    pub attributes: u8,
    pub domain_id: [u8; DOMAIN_ID_LEN],
    pub subnet: u8,
    pub node: u8,
    pub channel_type: u8,
    pub device_count: u8,
    /// The responding server's unique id.
    pub unique_id: UniqueId,
}

impl Didrm {
    pub const DID_LENGTH_MASK: u8 = 0x07;

    pub fn did_length(&self) -> usize {
        usize::from(self.attributes & Self::DID_LENGTH_MASK)
    }

    pub fn set_did_length(&mut self, len: usize) {
        self.attributes = (self.attributes & !Self::DID_LENGTH_MASK) | (len as u8 & Self::DID_LENGTH_MASK);
    }

    /// The fields compared when matching DIDRM/DIDCF against the cached
    /// response: everything up to, but excluding, the server's unique id.
    /// Redundant servers for the same domain remain interchangeable.
    pub fn matches_domain(&self, other: &Didrm) -> bool {
        self.attributes == other.attributes
            && self.domain_id == other.domain_id
            && self.subnet == other.subnet
            && self.node == other.node
            && self.channel_type == other.channel_type
            && self.device_count == other.device_count
    }
}

/// Timing guidance.
#[doc(alias = "IsiTimg")]
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
pub struct Timg {
    pub device_count: u8,
    pub channel_type: u8,
}

/// Connection status information.
#[doc(alias = "IsiCsmi")]
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
pub struct Csmi {
    pub header: ConnectionHeader,
    /// Record offset and zero-based selector count, see the constants.
    pub offset_count: u8,
}

impl Csmi {
    pub const OFFSET_SHIFT: u8 = 2;
    pub const OFFSET_MASK: u8 = 0xfc;
    pub const COUNT_MASK: u8 = 0x03;

    /// The record's offset within its connection, in units of
    /// [`WIDTH_PER_RECORD`](crate::WIDTH_PER_RECORD) selectors.
    pub fn offset(&self) -> u8 {
        (self.offset_count & Self::OFFSET_MASK) >> Self::OFFSET_SHIFT
    }

    /// Zero-based count of selectors covered beyond the first.
    pub fn count(&self) -> u8 {
        self.offset_count & Self::COUNT_MASK
    }

    pub fn set_offset_count(&mut self, offset: u8, count: u8) {
        self.offset_count = (offset << Self::OFFSET_SHIFT) | (count & Self::COUNT_MASK);
    }
}

/// Operations requested through the controlled-enrollment side channel.
#[doc(alias = "IsiControl")]
#[derive(IntoPrimitive, TryFromPrimitive, PartialEq, Eq, Clone, Copy, Debug)]
#[repr(u8)]
pub enum CtrlOp {
    Open = 0,
    Cancel = 1,
    Create = 2,
    Factory = 3,
}

/// Controlled enrollment request, sent unicast with unique-id addressing.
#[doc(alias = "IsiCtrq")]
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
pub struct Ctrq {
    /// A [`CtrlOp`] value.
    pub control: u8,
    /// The assembly the operation applies to.
    pub parameter: u8,
}

/// Controlled enrollment response.
#[doc(alias = "IsiCtrp")]
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
pub struct Ctrp {
    pub success: u8,
    pub unique_id: UniqueId,
}

/// Read connection table request.
#[doc(alias = "IsiRdct")]
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
pub struct Rdct {
    pub index: u8,
    pub host: u8,
    pub member: u8,
}

#[cfg(test)]
mod tests {
    use core::mem;

    use super::*;

    #[test]
    fn wire_sizes() {
        assert_eq!(mem::size_of::<Cid>(), 7);
        assert_eq!(mem::size_of::<ConnectionHeader>(), 9);
        assert_eq!(mem::size_of::<Drum>(), 20);
        assert_eq!(mem::size_of::<Csmo>(), 21);
        assert_eq!(mem::size_of::<Didrq>(), 7);
        assert_eq!(mem::size_of::<Didrm>(), 17);
        assert_eq!(mem::size_of::<Csmi>(), 10);
    }

    #[test]
    fn csmo_attributes() {
        let mut data = CsmoData::default();
        data.set_direction(Direction::Input);
        data.set_width(5);
        assert_eq!(data.direction(), Direction::Input);
        assert_eq!(data.width(), 5);
        assert_eq!(data.attributes1, 0x45);
    }

    #[test]
    fn csmi_offset_count() {
        let mut csmi = Csmi::default();
        csmi.set_offset_count(3, 2);
        assert_eq!(csmi.offset(), 3);
        assert_eq!(csmi.count(), 2);
        assert_eq!(csmi.offset_count, 0x0e);
    }
}
