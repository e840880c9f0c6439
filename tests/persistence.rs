mod common;

use common::{config, Device};
use isi::spec::record::ConnectionState;
use isi::{BootType, Engine, Event, Kind};

#[test]
fn connection_table_survives_restart() {
	let mut host = Device::new(1, Kind::S, Some(1));
	let mut guest = Device::new(2, Kind::S, Some(1));
	common::run_manual_enrollment(&mut host, &mut guest, 1);

	let records_before: Vec<_> = (0..host.engine.connection_table_size())
		.map(|index| host.engine.connection(index).unwrap())
		.collect();

	let (mut stack, app) = host.engine.stop();
	let image_before = stack
		.shared
		.segments
		.borrow()
		.clone();

	// A fresh engine instance on the same storage resumes with a normal
	// restart and a byte-identical table.
	stack.shared.frames.borrow_mut().clear();
	let engine = Engine::start(stack, app, config(Kind::S, 8)).unwrap();
	assert_eq!(engine.boot_type(), BootType::Restart);

	for (index, before) in records_before.iter().enumerate() {
		let after = engine.connection(index).unwrap();
		assert_eq!(after.cid(), before.cid());
		assert_eq!(after.selector(), before.selector());
		assert_eq!(after.state(), before.state());
		assert_eq!(after.host, before.host);
		assert_eq!(after.member, before.member);
	}

	let image_after = engine.stack().shared.segments.borrow().clone();
	assert_eq!(image_after[1], image_before[1]);
}

#[test]
fn damaged_image_falls_back_to_reboot() {
	let host = Device::new(1, Kind::S, Some(1));
	let (mut stack, app) = host.engine.stop();

	// Flip one payload byte in the persistent segment.
	{
		let mut segments = stack.shared.segments.borrow_mut();
		let image = segments[0].as_mut().unwrap();
		let last = image.len() - 1;
		image[last] ^= 0xff;
	}

	let engine = Engine::start(stack, app, config(Kind::S, 8)).unwrap();
	assert!(engine.is_running());
	for index in 0..engine.connection_table_size() {
		assert_eq!(
			engine.connection(index).unwrap().state(),
			ConnectionState::Unused
		);
	}
}

#[test]
fn factory_defaults_wipe_but_keep_serial() {
	let mut host = Device::new(1, Kind::S, Some(1));
	let mut guest = Device::new(2, Kind::S, Some(1));
	common::run_manual_enrollment(&mut host, &mut guest, 1);
	let serial = host.engine.connection(0).unwrap().cid().serial;

	host.engine.return_to_factory_defaults().unwrap();
	assert_eq!(*host.shared.resets.borrow(), 1);
	for index in 0..host.engine.connection_table_size() {
		assert_eq!(
			host.engine.connection(index).unwrap().state(),
			ConnectionState::Unused
		);
	}
	assert!(host.engine.is_running());

	// The CID serial survives the wipe, so the next enrollment cannot
	// collide with stale remote state.
	host.drain();
	host.engine.open_enrollment(1).unwrap();
	let next_serial = host.engine.connection(0).unwrap().cid().serial;
	assert_eq!(next_serial, serial.wrapping_add(1) % 255);
}

#[test]
fn stop_saves_both_segments() {
	let host = Device::new(1, Kind::S, Some(1));
	let shared = host.shared.clone();
	let _ = host.engine.stop();
	let segments = shared.segments.borrow();
	assert!(segments[0].is_some());
	assert!(segments[1].is_some());
}

#[test]
fn heartbeat_propagates_bound_output() {
	let mut host = Device::new(1, Kind::S, Some(1));
	let mut guest = Device::new(2, Kind::S, Some(1));
	common::run_manual_enrollment(&mut host, &mut guest, 1);
	host.drain();

	host.heartbeat.set(true);
	host.tick(3000);
	let frames = host.drain();
	// NV updates travel under 0x80 | selector-high.
	assert!(
		frames.iter().any(|frame| frame.code & 0x80 != 0),
		"no heartbeat seen among {} frames",
		frames.len()
	);
}

#[test]
fn ui_events_follow_the_lifecycle() {
	let mut host = Device::new(1, Kind::S, Some(1));
	let mut guest = Device::new(2, Kind::S, Some(1));
	common::run_manual_enrollment(&mut host, &mut guest, 1);

	assert!(host.has_event(Event::PendingHost));
	assert!(host.has_event(Event::ApprovedHost));
	assert!(host.has_event(Event::Implemented));
	assert!(guest.has_event(Event::Pending));
	assert!(guest.has_event(Event::Approved));
	assert!(guest.has_event(Event::Implemented));
}
