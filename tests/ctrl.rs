mod common;

use common::{config, Device};
use isi::spec::Code;
use isi::{Event, Flags, Kind};

fn controlled_device(uid: u8) -> Device {
	let mut config = config(Kind::S, 8);
	config.flags = Flags::CONTROLLED_ENROLLMENT;
	Device::with_config(uid, Some(3), config)
}

#[test]
fn controlled_open_enters_inviting() {
	let mut target = controlled_device(1);
	let mut manager = Device::new(9, Kind::S, None);

	manager
		.engine
		.open_controlled_enrollment(&target.unique_id, 3)
		.unwrap();
	target.deliver(&manager.drain());

	// The target acknowledged and opened enrollment for assembly 3.
	let responses = target.shared.responses.borrow();
	assert_eq!(responses.len(), 1);
	assert_eq!(responses[0].2[0], u8::from(Code::Ctrp));
	assert_eq!(responses[0].2[1], 1);
	drop(responses);

	assert!(target.has_event(Event::PendingHost));
	let frames = target.drain();
	assert!(frames
		.iter()
		.any(|frame| frame.payload[0] == u8::from(Code::Csmo)));
}

#[test]
fn controlled_enrollment_needs_the_flag() {
	let mut target = Device::new(1, Kind::S, Some(3));
	let mut manager = Device::new(9, Kind::S, None);

	manager
		.engine
		.open_controlled_enrollment(&target.unique_id, 3)
		.unwrap();
	target.deliver(&manager.drain());

	// Without the flag, the request is answered with a failure and nothing
	// happens.
	let responses = target.shared.responses.borrow();
	assert_eq!(responses.len(), 1);
	assert_eq!(responses[0].2[1], 0);
	drop(responses);
	assert!(!target.has_event(Event::PendingHost));
}

#[test]
fn read_connection_table_round_trip() {
	let mut target = controlled_device(1);
	let mut guest = Device::new(2, Kind::S, Some(3));
	common::run_manual_enrollment(&mut target, &mut guest, 3);

	let mut manager = Device::new(9, Kind::S, None);
	manager
		.engine
		.request_connection_table(&target.unique_id, 0, 3, 0xff)
		.unwrap();
	target.deliver(&manager.drain());

	let responses = target.shared.responses.borrow();
	let (_, _, payload) = responses.last().unwrap();
	assert_eq!(payload[0], u8::from(Code::Rdcs));
	// The record image follows the index byte; it names assembly 3 as the
	// host.
	let record = target.engine.connection(usize::from(payload[1])).unwrap();
	assert_eq!(record.host, 3);
	assert_eq!(&payload[2..15], zerocopy::AsBytes::as_bytes(&record));
}

#[test]
fn read_connection_table_miss_fails() {
	let mut target = controlled_device(1);
	let mut manager = Device::new(9, Kind::S, None);

	// No record hosts assembly 5.
	manager
		.engine
		.request_connection_table(&target.unique_id, 0, 5, 0xff)
		.unwrap();
	target.deliver(&manager.drain());

	let responses = target.shared.responses.borrow();
	assert_eq!(responses.last().unwrap().2[0], u8::from(Code::Rdcf));
}

#[test]
fn controlled_cancel() {
	let mut target = controlled_device(1);
	let mut manager = Device::new(9, Kind::S, None);

	manager
		.engine
		.open_controlled_enrollment(&target.unique_id, 3)
		.unwrap();
	target.deliver(&manager.drain());
	assert!(target.has_event(Event::PendingHost));

	manager
		.engine
		.cancel_controlled_enrollment(&target.unique_id, 3)
		.unwrap();
	target.deliver(&manager.drain());
	assert!(target.has_event(Event::Cancelled));
}
