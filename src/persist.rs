//! Engine persistence.
//!
//! The engine owns two storage segments, separate from the stack's network
//! image: its own small persistent record and the raw connection table.
//! Both are framed by a versioned, checksummed header; any mismatch on
//! restore discards the image and reports a typed loss reason.
//!
//! Integer fields are serialized in network byte order.

use alloc::vec::Vec;

use num_enum::{IntoPrimitive, TryFromPrimitive};

const SIGNATURE: u16 = 0xcf82;
const VERSION: u16 = 1;
const HEADER_LEN: usize = 14;

/// Why a persistence image was discarded on restore.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum PersistenceLoss {
	/// No image was found.
	Missing,
	/// The checksum or framing is invalid.
	Corruption,
	/// The image or application signature does not match.
	SignatureMismatch,
	/// The image was written by a newer version.
	VersionNotSupported,
	/// The image does not cover the configured table sizes.
	AttributeChange,
}

/// How much initialization work the next engine start performs.
#[derive(IntoPrimitive, TryFromPrimitive, PartialEq, Eq, PartialOrd, Clone, Copy, Debug)]
#[repr(u8)]
pub enum BootType {
	/// Wipe and rebuild every table.
	Reboot = 0,
	/// Tables arrive cleared; initialize engine structures only.
	Reset = 1,
	/// Normal restart; all tables survive.
	Restart = 2,
}

/// The engine's persistent record.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub(crate) struct PersistentState {
	/// Latest device-count estimate.
	pub devices: u8,
	/// Non-unique device id used by the DAS live counter.
	pub nuid: u8,
	/// Running serial of locally created CIDs.
	pub serial: u16,
	pub boot_type: BootType,
	/// NV update repeats, 1..=3.
	pub repeat_count: u8,
}

impl PersistentState {
	pub fn serialize(&self) -> [u8; 7] {
		let mut image = [0; 7];
		image[0] = self.devices;
		image[1] = self.nuid;
		image[2..4].copy_from_slice(&self.serial.to_be_bytes());
		image[4..6].copy_from_slice(&u16::from(u8::from(self.boot_type)).to_be_bytes());
		image[6] = self.repeat_count;
		image
	}

	/// Restores every field except the boot type, which tracks the local
	/// lifecycle rather than the stored image.
	pub fn deserialize(&mut self, image: &[u8]) -> Result<(), PersistenceLoss> {
		if image.len() < 7 {
			return Err(PersistenceLoss::Corruption);
		}
		self.devices = image[0];
		self.nuid = image[1];
		self.serial = u16::from_be_bytes([image[2], image[3]]);
		self.repeat_count = image[6];
		Ok(())
	}
}

fn checksum(payload: &[u8]) -> u16 {
	let mut sum = payload.len() as u16;
	for &byte in payload {
		sum = sum.wrapping_add(u16::from(byte));
	}
	sum
}

/// Frames `payload` with the segment header.
pub(crate) fn wrap(app_signature: u32, payload: &[u8]) -> Vec<u8> {
	let mut image = Vec::with_capacity(HEADER_LEN + payload.len());
	image.extend_from_slice(&SIGNATURE.to_be_bytes());
	image.extend_from_slice(&(payload.len() as u32).to_be_bytes());
	image.extend_from_slice(&app_signature.to_be_bytes());
	image.extend_from_slice(&VERSION.to_be_bytes());
	image.extend_from_slice(&checksum(payload).to_be_bytes());
	image.extend_from_slice(payload);
	image
}

/// Validates the segment header and returns the payload.
pub(crate) fn unwrap(app_signature: u32, image: &[u8]) -> Result<&[u8], PersistenceLoss> {
	if image.len() < HEADER_LEN {
		return Err(PersistenceLoss::Corruption);
	}
	let signature = u16::from_be_bytes([image[0], image[1]]);
	let length = u32::from_be_bytes([image[2], image[3], image[4], image[5]]) as usize;
	let stored_app = u32::from_be_bytes([image[6], image[7], image[8], image[9]]);
	let version = u16::from_be_bytes([image[10], image[11]]);
	let stored_checksum = u16::from_be_bytes([image[12], image[13]]);

	if signature != SIGNATURE || stored_app != app_signature {
		return Err(PersistenceLoss::SignatureMismatch);
	}
	if version > VERSION {
		return Err(PersistenceLoss::VersionNotSupported);
	}
	let payload = &image[HEADER_LEN..];
	if payload.len() < length {
		return Err(PersistenceLoss::Corruption);
	}
	let payload = &payload[..length];
	if checksum(payload) != stored_checksum {
		return Err(PersistenceLoss::Corruption);
	}
	Ok(payload)
}
