//! The connection table.
//!
//! A fixed-capacity, init-time-sized array of connection records plus the
//! CID serial allocation that keeps connection ids network-wide unique.

use alloc::vec;
use alloc::vec::Vec;

use isi_spec::msg::Cid;
use isi_spec::record::{ConnectionRecord, ConnectionState};
use isi_spec::UniqueId;
use zerocopy::{AsBytes, FromBytes};

/// Hard upper bound of the record count.
pub(crate) const MAX_CONNECTION_COUNT: usize = 256;

/// One CID serial byte is reserved, bounding a host to 255 outstanding
/// connections. Intentional; exhausting it reports no-connection-space.
const SERIAL_SPAN: u8 = 255;

pub(crate) struct ConnectionTable {
	records: Vec<ConnectionRecord>,
}

impl ConnectionTable {
	pub fn new(size: usize) -> Self {
		let size = size.clamp(1, MAX_CONNECTION_COUNT);
		Self {
			records: vec![ConnectionRecord::default(); size],
		}
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn get(&self, index: usize) -> ConnectionRecord {
		self.records[index]
	}

	pub fn record(&self, index: usize) -> Option<ConnectionRecord> {
		self.records.get(index).copied()
	}

	pub fn set(&mut self, index: usize, record: &ConnectionRecord) {
		self.records[index] = *record;
	}

	pub fn clear(&mut self, index: usize) {
		self.records[index] = ConnectionRecord::default();
	}

	pub fn clear_all(&mut self) {
		self.records.fill(ConnectionRecord::default());
	}

	/// The lowest index whose record is at least `min_state` and carries
	/// `cid`.
	pub fn find_by_cid(&self, cid: &Cid, min_state: ConnectionState) -> Option<usize> {
		self.records
			.iter()
			.position(|record| record.state() >= min_state && record.cid() == cid)
	}

	fn is_cid_in_use(&self, cid: &Cid) -> bool {
		self.records
			.iter()
			.any(|record| record.state() > ConnectionState::Unused && record.cid() == cid)
	}

	/// The successor of the highest serial currently in use with
	/// `unique_id`, wrapping within `0..=254`.
	fn next_serial_avail(&self, unique_id: &UniqueId) -> u8 {
		let mut highest: Option<u8> = None;
		for record in &self.records {
			if record.state() > ConnectionState::Unused
				&& record.cid().unique_id == *unique_id
				&& highest.is_none_or(|serial| record.cid().serial > serial)
			{
				highest = Some(record.cid().serial);
			}
		}
		highest.map_or(0, |serial| serial.wrapping_add(1) % SERIAL_SPAN)
	}

	/// Creates a new unique connection id, or `None` when all serials for
	/// this device are outstanding. `floor` is the persisted running
	/// serial, so the sequence survives a factory wipe of the table.
	pub fn create_cid(&self, unique_id: &UniqueId, floor: u8) -> Option<Cid> {
		let first = self.next_serial_avail(unique_id).max(floor % SERIAL_SPAN);
		let mut serial = first;
		loop {
			let cid = Cid {
				unique_id: *unique_id,
				serial,
			};
			if !self.is_cid_in_use(&cid) {
				return Some(cid);
			}
			serial = (serial + 1) % SERIAL_SPAN;
			if serial == first {
				return None;
			}
		}
	}

	/// The raw record array, for persistence.
	pub fn image(&self) -> Vec<u8> {
		let mut image = Vec::with_capacity(self.records.len() * core::mem::size_of::<ConnectionRecord>());
		for record in &self.records {
			image.extend_from_slice(record.as_bytes());
		}
		image
	}

	/// Restores the record array from a persistence image. The image must
	/// cover at least the configured table size.
	pub fn restore(&mut self, image: &[u8]) -> bool {
		let record_len = core::mem::size_of::<ConnectionRecord>();
		if image.len() < self.records.len() * record_len {
			return false;
		}
		for (index, chunk) in image.chunks_exact(record_len).take(self.records.len()).enumerate() {
			self.records[index] = ConnectionRecord::read_from(chunk).unwrap();
		}
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn used_record(unique_id: UniqueId, serial: u8) -> ConnectionRecord {
		let mut record = ConnectionRecord::default();
		record.header.cid = Cid { unique_id, serial };
		record.set_state(ConnectionState::InUse);
		record
	}

	#[test]
	fn table_size_is_clamped() {
		assert_eq!(ConnectionTable::new(0).len(), 1);
		assert_eq!(ConnectionTable::new(40).len(), 40);
		assert_eq!(ConnectionTable::new(100_000).len(), MAX_CONNECTION_COUNT);
	}

	#[test]
	fn serial_follows_highest_in_use() {
		let uid = [1, 2, 3, 4, 5, 6];
		let mut table = ConnectionTable::new(8);
		assert_eq!(table.create_cid(&uid, 0).unwrap().serial, 0);

		table.set(0, &used_record(uid, 4));
		table.set(1, &used_record(uid, 9));
		table.set(2, &used_record([9; 6], 200));
		assert_eq!(table.create_cid(&uid, 0).unwrap().serial, 10);
		assert_eq!(table.create_cid(&uid, 40).unwrap().serial, 40);
	}

	#[test]
	fn serial_space_exhaustion() {
		let uid = [7; 6];
		let mut table = ConnectionTable::new(MAX_CONNECTION_COUNT);
		for serial in 0..255u16 {
			table.set(usize::from(serial as u8), &used_record(uid, serial as u8));
		}
		assert_eq!(table.create_cid(&uid, 0), None);
	}

	#[test]
	fn cid_lookup_honors_state_floor(){
		let uid = [2; 6];
		let mut table = ConnectionTable::new(4);
		let mut record = used_record(uid, 1);
		record.set_state(ConnectionState::Pending);
		table.set(2, &record);

		let cid = Cid { unique_id: uid, serial: 1 };
		assert_eq!(table.find_by_cid(&cid, ConnectionState::Pending), Some(2));
		assert_eq!(table.find_by_cid(&cid, ConnectionState::InUse), None);
	}

	#[test]
	fn image_round_trip() {
		let mut table = ConnectionTable::new(6);
		table.set(3, &used_record([3; 6], 17));
		let image = table.image();

		let mut restored = ConnectionTable::new(6);
		assert!(restored.restore(&image));
		assert_eq!(restored.image(), image);
		assert!(!restored.restore(&image[1..]));
	}
}
