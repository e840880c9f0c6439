mod common;

use common::{Device, TestStack};
use isi::spec::msg::Csmi;
use isi::spec::record::ConnectionState;
use isi::spec::{Code, SELECTOR_MASK};
use isi::stack::{AddressEntry, Stack};
use isi::{Error, Event, Kind};
use zerocopy::AsBytes;

fn isi_frames(frames: &[common::Frame], code: Code) -> Vec<Vec<u8>> {
	frames
		.iter()
		.filter(|frame| frame.code == isi::spec::APPLICATION_CODE && frame.payload[0] == code.into())
		.map(|frame| frame.payload.clone())
		.collect()
}

#[test]
fn two_device_manual_enrollment() {
	let mut host = Device::new(1, Kind::S, Some(1));
	let mut guest = Device::new(2, Kind::S, Some(1));

	host.engine.open_enrollment(1).unwrap();
	assert!(host.has_event(Event::PendingHost));

	let frames = host.drain();
	assert_eq!(isi_frames(&frames, Code::Csmo).len(), 1);
	guest.deliver(&frames);
	assert!(guest.has_event(Event::Pending));

	guest.engine.create_enrollment(1).unwrap();
	assert!(guest.has_event(Event::Approved));
	let frames = guest.drain();
	assert!(!isi_frames(&frames, Code::Csme).is_empty());
	host.deliver(&frames);
	assert!(host.has_event(Event::ApprovedHost));

	host.engine.create_enrollment(1).unwrap();
	let frames = host.drain();
	assert!(!isi_frames(&frames, Code::Csmc).is_empty());
	// The selector claim follows the confirmation immediately.
	assert!(!isi_frames(&frames, Code::Csmi).is_empty());
	guest.deliver(&frames);

	assert!(host.has_event(Event::Implemented));
	assert!(guest.has_event(Event::Implemented));

	let host_record = host.engine.connection(0).unwrap();
	let guest_record = guest.engine.connection(0).unwrap();
	assert_eq!(host_record.state(), ConnectionState::InUse);
	assert_eq!(guest_record.state(), ConnectionState::InUse);
	assert_eq!(host_record.cid(), guest_record.cid());
	assert_eq!(host_record.selector(), guest_record.selector());

	// The guest's NV is programmed with the connection selector and an
	// address-table entry referencing the host's group.
	let nv = guest.engine.stack().nv_config(1);
	assert!(nv.is_bound());
	assert_eq!(nv.selector, guest_record.selector());
	let entry = guest.engine.stack().address(usize::from(nv.address_index));
	match entry {
		AddressEntry::Group(group) => assert_eq!(group.group, 0x80 | 1),
		other => panic!("expected a group entry, got {other:?}"),
	}

	assert!(host.engine.is_connected(1));
	assert!(guest.engine.is_connected(1));
}

#[test]
fn duplicate_invitation_is_suppressed() {
	let mut host = Device::new(1, Kind::S, Some(1));
	let mut guest = Device::new(2, Kind::S, Some(1));

	host.engine.open_enrollment(1).unwrap();
	let frames = host.drain();
	guest.deliver(&frames);
	let pending_before = guest.events.borrow().len();

	// The host keeps re-sending the invitation for reach; re-sends must
	// not restart the guest's enrollment.
	guest.deliver(&frames);
	assert_eq!(guest.events.borrow().len(), pending_before);
}

#[test]
fn cancel_and_reopen() {
	let mut host = Device::new(1, Kind::S, Some(1));
	let mut guest = Device::new(2, Kind::S, Some(1));

	host.engine.open_enrollment(1).unwrap();
	guest.deliver(&host.drain());

	host.engine.cancel_enrollment().unwrap();
	assert!(host.has_event(Event::Cancelled));
	let frames = host.drain();
	assert!(!isi_frames(&frames, Code::Csmx).is_empty());
	guest.deliver(&frames);
	assert!(guest.has_event(Event::Cancelled));

	// The same assembly enrolls again cleanly.
	common::run_manual_enrollment(&mut host, &mut guest, 1);
	assert!(host.engine.is_connected(1));
	assert!(guest.engine.is_connected(1));
}

#[test]
fn selector_conflict_moves_the_connection() {
	let mut host = Device::new(1, Kind::S, Some(1));
	let mut guest = Device::new(2, Kind::S, Some(1));
	common::run_manual_enrollment(&mut host, &mut guest, 1);
	host.drain();

	let record = host.engine.connection(0).unwrap();
	let old_selector = record.selector();

	// An unrelated connection claims our selector.
	let mut foreign = Csmi::default();
	foreign.header.cid.unique_id = [9; 6];
	foreign.header.cid.serial = 3;
	foreign.header.selector = old_selector.into();
	foreign.set_offset_count(0, 0);

	let mut payload = vec![u8::from(Code::Csmi)];
	payload.extend_from_slice(foreign.as_bytes());
	host.engine.filter_msg(isi::spec::APPLICATION_CODE, &payload, 1);

	let expected = {
		let mut selector = old_selector + u16::from(record.width());
		for byte in record.cid().as_bytes() {
			selector = (selector + u16::from(*byte)) % 0x3000;
		}
		selector % 0x3000
	};
	let moved = host.engine.connection(0).unwrap();
	assert_eq!(moved.selector(), expected);
	assert_eq!(moved.state(), ConnectionState::InUse);
	assert!(moved.selector() <= SELECTOR_MASK);

	// The local NV table follows, and the new claim is announced.
	assert_eq!(host.engine.stack().nv_config(1).selector, expected);
	let frames = host.drain();
	let claims = isi_frames(&frames, Code::Csmi);
	assert!(!claims.is_empty());
	assert_eq!(
		u16::from_le_bytes([claims[0][8], claims[0][9]]),
		expected
	);

	// The guest follows the host's updated claim.
	guest.deliver(&frames);
	assert_eq!(guest.engine.connection(0).unwrap().selector(), expected);
	assert_eq!(guest.engine.stack().nv_config(1).selector, expected);
}

#[test]
fn single_record_table_rejects_second_invitation() {
	let mut host = Device::with_config(1, Some(1), common::config(Kind::S, 1));
	let mut guest = Device::with_config(2, Some(1), common::config(Kind::S, 1));
	common::run_manual_enrollment(&mut host, &mut guest, 1);
	assert!(guest.engine.is_connected(1));

	// Guest's only record is in use; a new invitation cannot be approved
	// and must not leave the guest pending.
	let mut other = Device::new(3, Kind::S, Some(2));
	other.engine.open_enrollment(2).unwrap();
	let pending_before = guest.events.borrow().len();
	guest.deliver(&other.drain());
	assert_eq!(guest.events.borrow().len(), pending_before);
}

#[test]
fn wide_enrollment_fails_atomically() {
	let stack = TestStack::new(1, 8);
	let mut app = common::TestApp::new(None);
	app.width = 5;
	let mut engine = isi::Engine::start(stack, app, common::config(Kind::S, 1)).unwrap();

	// Width 5 needs two records; the single-record table must reject the
	// enrollment without leaving a partial reservation behind.
	assert_eq!(engine.open_enrollment(1), Err(Error::NoConnectionSpace));
	assert_eq!(
		engine.connection(0).unwrap().state(),
		ConnectionState::Unused
	);
}

#[test]
fn enrollment_times_out() {
	let mut host = Device::new(1, Kind::S, Some(1));
	host.engine.open_enrollment(1).unwrap();
	host.drain();

	// Nobody answers; the enrollment expires into cancellation.
	host.tick(isi::spec::T_ENROLL + 2);
	assert!(host.has_event(Event::Cancelled));
	let frames = host.drain();
	assert!(!isi_frames(&frames, Code::Csmx).is_empty());
}

#[test]
fn connection_delete_propagates() {
	let mut host = Device::new(1, Kind::S, Some(1));
	let mut guest = Device::new(2, Kind::S, Some(1));
	common::run_manual_enrollment(&mut host, &mut guest, 1);
	host.drain();

	host.engine.delete_enrollment(1).unwrap();
	assert!(!host.engine.is_connected(1));
	let frames = host.drain();
	assert!(!isi_frames(&frames, Code::Csmd).is_empty());

	guest.deliver(&frames);
	assert!(!guest.engine.is_connected(1));
	assert!(!guest.engine.stack().nv_config(1).is_bound());
	// The swept address table holds no leaked group entries.
	for index in 0..guest.engine.stack().address_count() {
		assert_eq!(guest.engine.stack().address(index), AddressEntry::Unbound);
	}
}

#[test]
fn automatic_enrollment_implements_immediately() {
	let mut host = Device::new(1, Kind::S, Some(1));
	let mut guest = Device::new(2, Kind::S, Some(1));

	// Automatic enrollment only opens after the warmup phase.
	host.tick(isi::spec::T_AUTO + 2);
	assert!(host.has_event(Event::Warm));
	host.drain();

	host.engine.initiate_auto_enrollment(None, 1).unwrap();
	assert!(host.engine.is_connected(1));
	assert!(host.engine.is_automatically_enrolled(1));

	let frames = host.drain();
	assert!(!isi_frames(&frames, Code::Csma).is_empty());
	guest.deliver(&frames);

	// The guest accepts and implements without operator involvement.
	assert!(guest.engine.is_connected(1));
	assert!(guest.engine.is_automatically_enrolled(1));
	assert!(guest.has_event(Event::Implemented));
	assert!(guest.engine.stack().nv_config(1).is_bound());
}

#[test]
fn automatic_host_reminds_with_csmr() {
	let mut host = Device::new(1, Kind::S, Some(1));
	host.tick(isi::spec::T_AUTO + 2);
	host.engine.initiate_auto_enrollment(None, 1).unwrap();
	host.drain();

	// Once the reminder guard has passed, the broadcast rotation serves
	// the automatic connection with CSMR.
	host.tick(isi::spec::T_CSMR + 4000);
	let frames = host.drain();
	assert!(!isi_frames(&frames, Code::Csmr).is_empty());
	// DRUM stays the dominant class.
	assert!(!isi_frames(&frames, Code::Drum).is_empty());
}
