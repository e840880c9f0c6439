mod common;

use common::{Device, Frame};
use isi::spec::msg::{Didrm, Drum};
use isi::spec::{Code, T_CF, T_COLL};
use isi::stack::Stack;
use isi::{Event, Kind};
use zerocopy::{AsBytes, FromBytes};

fn isi_frames(frames: &[Frame], code: Code) -> Vec<Vec<u8>> {
	frames
		.iter()
		.filter(|frame| frame.code == isi::spec::APPLICATION_CODE && frame.payload[0] == code.into())
		.map(|frame| frame.payload.clone())
		.collect()
}

#[test]
fn domain_acquisition_round_trip() {
	let mut server = Device::new(10, Kind::Das, None);
	let mut device = Device::new(20, Kind::Da, None);

	// The operator arms the server, then presses the device's button.
	server.engine.start_device_acquisition().unwrap();
	device.engine.acquire_domain(false).unwrap();
	assert_eq!(*device.shared.service_pins.borrow(), 1);

	let frames = device.drain();
	assert!(!isi_frames(&frames, Code::Didrq).is_empty());
	server.deliver(&frames);

	let frames = server.drain();
	let didrms = isi_frames(&frames, Code::Didrm);
	assert_eq!(didrms.len(), 1);
	let didrm = Didrm::read_from(&didrms[0][1..]).unwrap();
	device.deliver(&frames);

	// The collection window passes without a competing response; the
	// server device winks for the operator.
	device.tick(T_COLL + 2);
	assert!(device.has_event(Event::Wink));

	// The operator confirms at the server.
	server.engine.start_device_acquisition().unwrap();
	let frames = server.drain();
	assert!(!isi_frames(&frames, Code::Didcf).is_empty());
	device.deliver(&frames);

	assert!(device.has_event(Event::Registered));
	let domain = device.engine.stack().domain(0);
	let server_domain = server.engine.stack().domain(0);
	assert_eq!(domain.len, server_domain.len);
	assert_eq!(domain.id, server_domain.id);
	assert_eq!(domain.subnet, didrm.subnet);
	assert_eq!(domain.node, didrm.node);

	// Registration is announced right away.
	let frames = device.drain();
	assert!(!isi_frames(&frames, Code::Drum).is_empty());
}

#[test]
fn mismatching_didrm_aborts() {
	let mut device = Device::new(20, Kind::Da, None);
	let mut server_a = Device::new(10, Kind::Das, None);
	let mut server_b = Device::new(11, Kind::Das, None);

	server_a.engine.start_device_acquisition().unwrap();
	server_b.engine.start_device_acquisition().unwrap();
	device.engine.acquire_domain(true).unwrap();

	let request = device.drain();
	server_a.deliver(&request);
	server_b.deliver(&request);

	// Two servers on different domains answer; the device must give up
	// rather than guess.
	device.deliver(&server_a.drain());
	let mut second = server_b.drain();
	for frame in &mut second {
		if let isi::stack::Destination::UniqueId { unique_id, .. } = &mut frame.destination {
			*unique_id = device.unique_id;
		}
	}
	// Make the second response disagree on the domain id.
	for payload in second.iter_mut().map(|frame| &mut frame.payload) {
		if payload[0] == u8::from(Code::Didrm) {
			payload[2] ^= 0x55;
		}
	}
	device.deliver(&second);
	assert!(device.has_event(Event::Aborted));
}

#[test]
fn acquisition_retries_then_gives_up() {
	let mut device = Device::new(20, Kind::Da, None);
	device.engine.acquire_domain(true).unwrap();
	device.drain();

	// One full retry cycle: the response window expires, the engine
	// pauses, then re-issues the request.
	device.tick(isi::spec::T_RM + 2);
	device.tick(isi::spec::DIDRQ_PAUSE + 2);
	assert!(device.has_event(Event::Retry));
	let frames = device.drain();
	assert!(!isi_frames(&frames, Code::Didrq).is_empty());
}

#[test]
fn confirmation_window_expires() {
	let mut server = Device::new(10, Kind::Das, None);
	let mut device = Device::new(20, Kind::Da, None);

	server.engine.start_device_acquisition().unwrap();
	device.engine.acquire_domain(true).unwrap();
	server.deliver(&device.drain());
	device.deliver(&server.drain());

	// Wink, then never confirm.
	device.tick(T_COLL + 2);
	assert!(device.has_event(Event::Wink));
	device.tick(T_CF + 2);
	// With retries left this enters the pause state rather than aborting.
	assert!(!device.has_event(Event::Aborted));
}

#[test]
fn device_count_estimator_tracks_drums() {
	let mut server = Device::new(10, Kind::Das, None);

	// 40 distinct devices announce themselves.
	for nuid in 0..40u8 {
		let mut drum = Drum::default();
		drum.set_did_length(2);
		drum.domain_id = [0x77, 0x66, 0, 0, 0, 0];
		drum.unique_id = [nuid.wrapping_add(100); 6];
		drum.nuid = nuid;
		drum.channel_type = 0x04;

		let mut payload = vec![u8::from(Code::DrumEx)];
		payload.extend_from_slice(drum.as_bytes());
		server
			.engine
			.filter_msg(isi::spec::APPLICATION_CODE, &payload, 1);
	}

	let estimate = server.engine.current_estimate();
	assert!(estimate >= 40, "estimate {estimate} too low");
	assert!(u32::from(estimate) <= 255);
}

#[test]
fn estimate_has_a_floor() {
	let server = Device::new(10, Kind::Das, None);
	// A fresh table still reports at least the minimum estimate.
	assert!(server.engine.current_estimate() >= 8);
}

#[test]
fn fetch_domain_sniffs_a_donor() {
	let mut server = Device::new(10, Kind::Das, None);
	let donor_uid = [5u8; 6];

	server.engine.fetch_domain().unwrap();

	// First service pin: the server winks at the donor.
	let mut pin = Vec::new();
	pin.extend_from_slice(&donor_uid);
	pin.extend_from_slice(&[0; 8]);
	server.engine.filter_msg(0x7f, &pin, 1);
	let frames = server.drain();
	assert!(frames.iter().any(|frame| frame.code == 0x70));

	// Second service pin from the same donor: query its domain.
	server.engine.filter_msg(0x7f, &pin, 1);
	let frames = server.drain();
	assert!(frames.iter().any(|frame| frame.code == 0x6a));

	// The donor's domain comes back; the server adopts it and announces.
	let mut response = Vec::new();
	response.extend_from_slice(&[0xde, 0xad, 0, 0, 0, 0]); // id
	response.push(33); // donor subnet
	response.push(0x80 | 9); // donor node
	response.push(2); // id length
	response.extend_from_slice(&[0; 6]); // key
	assert!(!server.engine.process_response(0x2a, &response));

	assert!(server.has_event(Event::Registered));
	let domain = server.engine.stack().domain(0);
	assert_eq!(domain.len, 2);
	assert_eq!(&domain.id[..2], &[0xde, 0xad]);
	let frames = server.drain();
	assert!(!isi_frames(&frames, Code::Drum).is_empty());
}

#[test]
fn fetch_aborts_on_second_device() {
	let mut server = Device::new(10, Kind::Das, None);
	server.engine.fetch_domain().unwrap();

	let mut pin = vec![0u8; 14];
	pin[..6].copy_from_slice(&[5; 6]);
	server.engine.filter_msg(0x7f, &pin, 1);

	// A different device's pin within the window kills the procedure.
	pin[..6].copy_from_slice(&[6; 6]);
	server.engine.filter_msg(0x7f, &pin, 1);
	assert!(server.has_event(Event::Aborted));
}
