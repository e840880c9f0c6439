//! This crate provides common definitions from the Interoperable
//! Self-Installation (ISI) protocol specification: message codes, wire
//! structures, bit-field constants and the protocol timing table.
//! This crate does not provide any engine functionality.
//!
//! ISI messages travel as LonTalk application messages under the dedicated
//! application code [`APPLICATION_CODE`]. The first payload byte is the ISI
//! message [`Code`]; the remaining bytes are the message structure defined in
//! [`msg`]. Receivers accept up to [`MESSAGE_HEADROOM`] trailing bytes beyond
//! the declared length for forward-compatible extension fields.

#![cfg_attr(not(test), no_std)]

pub mod msg;
pub mod record;

use core::mem;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use self::msg::{Cid, ConnectionHeader, Csmi, CsmoData, CsmoExtended, Ctrq, Didrm, Didrq, Drum, DrumExtended, Rdct, Timg};
use self::record::ConnectionRecord;

/// The LonTalk application message code carrying ISI payloads.
#[doc(alias = "LonApplicationIsi")]
pub const APPLICATION_CODE: u8 = 0x3D;

/// ISI protocol version advertised on the wire.
///
/// The three most significant bits of the code byte carry the protocol
/// version and must be zero on this version.
pub const PROTOCOL_VERSION: u8 = 3;

/// Trailing bytes a receiver accepts beyond a message's declared length.
pub const MESSAGE_HEADROOM: usize = 4;

/// Length of a LonTalk unique device id ("neuron id").
pub const UNIQUE_ID_LEN: usize = 6;

/// Maximum length of a LonTalk domain id.
pub const DOMAIN_ID_LEN: usize = 6;

/// A LonTalk unique device id.
pub type UniqueId = [u8; UNIQUE_ID_LEN];

/// NV selectors are 14-bit values; arithmetic wraps modulo [`SELECTOR_SPAN`].
pub const SELECTOR_MASK: u16 = 0x2fff;

/// The modulus of selector arithmetic.
pub const SELECTOR_SPAN: u16 = 0x3000;

/// High selector bytes above this value denote an unbound NV.
pub const SELECTOR_HIGH_BOUND: u8 = 0x2f;

/// Sentinel for "no assembly" in wire messages and connection records.
pub const NO_ASSEMBLY: u8 = 0xff;

/// Selectors governed by one connection record.
pub const WIDTH_PER_RECORD: u8 = 4;

/// Engine ticks per second; one tick is 250 ms.
pub const TICKS_PER_SECOND: u32 = 4;

/// Acquisition timeout, five minutes.
pub const T_ACQ: u32 = 5 * 60 * TICKS_PER_SECOND;
/// Overall enrollment timeout.
pub const T_ENROLL: u32 = T_ACQ;
/// CSMO re-send interval.
pub const T_CSMO: u32 = 5 * TICKS_PER_SECOND;
/// CSME re-send interval.
pub const T_CSME: u32 = T_CSMO;
/// Startup guard before CSMR reminders participate in the broadcast scheme.
pub const T_CSMR: u32 = 60 * TICKS_PER_SECOND;
/// Minimum hesitation, in seconds, between a DIDCF and the CSMR burst.
pub const T_CSMR_PAUSE: u32 = 15;
/// Startup time after which the engine reports the warm event.
pub const T_AUTO: u32 = 30 * TICKS_PER_SECOND;
/// DIDRM response window.
pub const T_RM: u32 = 5 * TICKS_PER_SECOND;
/// DIDRM collection window.
pub const T_COLL: u32 = 3 * TICKS_PER_SECOND / 2;
/// Confirmation window following the collection phase.
pub const T_CF: u32 = T_ACQ / 5;
/// Pause between domain-acquisition retries.
pub const DIDRQ_PAUSE: u32 = 5 * T_RM;
/// Domain-acquisition retry budget.
pub const DIDRQ_RETRIES: u8 = 20;
/// Query-domain response guard.
pub const T_QDR: u32 = 1 + TICKS_PER_SECOND;
/// Update-domain response guard.
pub const T_UDR: u32 = 2 + TICKS_PER_SECOND;

/// Default device-count estimate before any TIMG guidance arrives.
pub const DEFAULT_DEVICE_COUNT: u8 = 32;

/// ISI message codes.
///
/// The code table is authoritative: codes are sequential and start at zero.
/// Codes through [`Code::Csmi`] are periodic broadcasts; the remaining codes
/// form the controlled-enrollment request/response side channel.
#[derive(IntoPrimitive, TryFromPrimitive, PartialEq, Eq, PartialOrd, Clone, Copy, Debug)]
#[repr(u8)]
pub enum Code {
    /// Device resource usage message.
    Drum = 0,
    /// DRUM with device class and usage extension.
    DrumEx = 1,
    /// Open enrollment (manual).
    Csmo = 2,
    /// CSMO, extended form.
    CsmoEx = 3,
    /// Open enrollment (automatic).
    Csma = 4,
    /// CSMA, extended form.
    CsmaEx = 5,
    /// Enrollment reminder (automatic).
    Csmr = 6,
    /// CSMR, extended form.
    CsmrEx = 7,
    /// Domain id request.
    Didrq = 8,
    /// Domain id response.
    Didrm = 9,
    /// Domain id confirmation.
    Didcf = 10,
    /// Timing guidance.
    Timg = 11,
    /// Cancel enrollment.
    Csmx = 12,
    /// Confirm enrollment.
    Csmc = 13,
    /// Accept enrollment.
    Csme = 14,
    /// Delete connection.
    Csmd = 15,
    /// Connection status information.
    Csmi = 16,
    /// Controlled enrollment request.
    Ctrq = 17,
    /// Controlled enrollment response.
    Ctrp = 18,
    /// Read connection table request.
    Rdct = 19,
    /// Read connection table success response.
    Rdcs = 20,
    /// Read connection table failure response.
    Rdcf = 21,
}

impl Code {
    /// The highest code delivered through the broadcast path.
    pub const LAST_BROADCAST: Code = Code::Csmi;

    /// The expected total message length (code byte included).
    ///
    /// Receivers accept `expected..=expected + MESSAGE_HEADROOM` bytes.
    pub const fn expected_len(self) -> usize {
        1 + match self {
            Code::Drum => mem::size_of::<Drum>() - mem::size_of::<DrumExtended>(),
            Code::DrumEx => mem::size_of::<Drum>(),
            Code::Csmo | Code::Csma | Code::Csmr => {
                mem::size_of::<ConnectionHeader>() + mem::size_of::<CsmoData>()
                    - mem::size_of::<CsmoExtended>()
            }
            Code::CsmoEx | Code::CsmaEx | Code::CsmrEx => {
                mem::size_of::<ConnectionHeader>() + mem::size_of::<CsmoData>()
            }
            Code::Didrq => mem::size_of::<Didrq>(),
            Code::Didrm | Code::Didcf => mem::size_of::<Didrm>(),
            Code::Timg => mem::size_of::<Timg>(),
            Code::Csmx | Code::Csmc | Code::Csme | Code::Csmd => mem::size_of::<Cid>(),
            Code::Csmi => mem::size_of::<Csmi>(),
            Code::Ctrq => mem::size_of::<Ctrq>(),
            Code::Ctrp => 1 + UNIQUE_ID_LEN,
            Code::Rdct => mem::size_of::<Rdct>(),
            Code::Rdcs => 1 + mem::size_of::<ConnectionRecord>(),
            Code::Rdcf => 0,
        }
    }

    /// Whether this code is a short-form variant whose extension fields are
    /// implied rather than transmitted.
    pub const fn is_short_form(self) -> bool {
        matches!(self, Code::Drum | Code::Csmo | Code::Csma | Code::Csmr)
    }

    /// Whether this code opens an automatic connection (CSMA/CSMR family).
    pub const fn is_automatic(self) -> bool {
        matches!(
            self,
            Code::Csma | Code::CsmaEx | Code::Csmr | Code::CsmrEx
        )
    }
}

/// Channel types as announced in DRUM and TIMG messages.
///
/// Supported channel type numbers ascend with decreasing channel speed.
#[derive(IntoPrimitive, TryFromPrimitive, PartialEq, Eq, PartialOrd, Clone, Copy, Debug)]
#[repr(u8)]
pub enum ChannelType {
    /// IzoT IP channel.
    IzotIp = 0x00,
    /// TP/FT-10 free topology channel.
    TpFt = 0x04,
    /// PL-20A power line channel.
    Pl20A = 0x0f,
    /// PL-20C power line channel.
    Pl20C = 0x10,
    /// PL-20N power line channel.
    Pl20N = 0x11,
    /// IP-852 channel.
    Ip852 = 0x9a,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_lengths() {
        assert_eq!(Code::Drum.expected_len(), 18);
        assert_eq!(Code::DrumEx.expected_len(), 21);
        assert_eq!(Code::Csmo.expected_len(), 14);
        assert_eq!(Code::CsmoEx.expected_len(), 22);
        assert_eq!(Code::Didrq.expected_len(), 8);
        assert_eq!(Code::Didrm.expected_len(), 18);
        assert_eq!(Code::Didcf.expected_len(), 18);
        assert_eq!(Code::Timg.expected_len(), 3);
        assert_eq!(Code::Csmx.expected_len(), 8);
        assert_eq!(Code::Csmi.expected_len(), 11);
    }

    #[test]
    fn code_round_trip() {
        for raw in 0..=21u8 {
            let code = Code::try_from(raw).unwrap();
            assert_eq!(u8::from(code), raw);
        }
        assert!(Code::try_from(22u8).is_err());
    }
}
