//! In-memory link stack and application for engine integration tests.
//!
//! `TestStack` keeps all tables as plain vectors and records every outbound
//! frame in a shared outbox, so a test can wire two engines together by
//! draining one side's outbox into the other side's message entry points.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use isi::app::NvDirectory;
use isi::spec::msg::CsmoData;
use isi::spec::{ChannelType, UniqueId};
use isi::stack::{
	AddressEntry, AliasConfig, Correlator, Destination, DomainConfig, NvConfig, Segment,
	ServiceType, Stack,
};
use isi::{Application, Config, DomainId, Engine, Event, Flags, Kind};

/// One frame captured from the stack's send path.
#[derive(Clone, Debug)]
pub struct Frame {
	pub service: ServiceType,
	pub destination: Destination,
	pub repeats: u8,
	pub code: u8,
	pub payload: Vec<u8>,
}

/// State a test shares with the stack it handed to an engine.
#[derive(Default)]
pub struct Shared {
	pub frames: RefCell<Vec<Frame>>,
	pub responses: RefCell<Vec<(Correlator, u8, Vec<u8>)>>,
	pub segments: RefCell<[Option<Vec<u8>>; 2]>,
	pub service_pins: RefCell<u32>,
	pub resets: RefCell<u32>,
}

pub struct TestStack {
	pub unique_id: UniqueId,
	pub program_id: [u8; 8],
	pub nvs: Vec<NvConfig>,
	pub nv_types: Vec<u8>,
	pub nv_values: Vec<Vec<u8>>,
	pub aliases: Vec<AliasConfig>,
	pub addresses: Vec<AddressEntry>,
	pub domains: [DomainConfig; 2],
	pub non_group_timer: u8,
	pub online: u32,
	pub shared: Rc<Shared>,
}

impl TestStack {
	/// A stack for a device with `nv_count` output NVs of type 42.
	pub fn new(uid: u8, nv_count: usize) -> Self {
		let mut nvs = Vec::new();
		for index in 0..nv_count {
			let mut nv = NvConfig::unbound(index);
			nv.output = true;
			nvs.push(nv);
		}
		Self {
			unique_id: [uid, uid, uid, uid, uid, uid],
			program_id: [0x90, 0x01, 0x02, 0x03, 0x04, 0x05, ChannelType::TpFt.into(), 0x00],
			nvs,
			nv_types: vec![42; nv_count],
			nv_values: vec![vec![0xaa, 0xbb]; nv_count],
			aliases: vec![AliasConfig::UNUSED; 4],
			addresses: vec![AddressEntry::Unbound; 8],
			domains: [DomainConfig::default(), DomainConfig::default()],
			non_group_timer: 0xff,
			online: 0,
			shared: Rc::new(Shared::default()),
		}
	}
}

impl Stack for TestStack {
	fn unique_id(&self) -> UniqueId {
		self.unique_id
	}

	fn program_id(&self) -> [u8; 8] {
		self.program_id
	}

	fn seed(&mut self) -> [u8; 32] {
		let mut seed = [0; 32];
		seed[0] = self.unique_id[0];
		seed
	}

	fn nv_count(&self) -> usize {
		self.nvs.len()
	}

	fn nv_config(&self, index: usize) -> NvConfig {
		self.nvs[index]
	}

	fn update_nv_config(&mut self, index: usize, nv: &NvConfig) {
		self.nvs[index] = *nv;
	}

	fn nv_type(&self, index: usize) -> u8 {
		self.nv_types[index]
	}

	fn nv_value(&self, index: usize) -> Vec<u8> {
		self.nv_values[index].clone()
	}

	fn alias_count(&self) -> usize {
		self.aliases.len()
	}

	fn alias(&self, index: usize) -> AliasConfig {
		self.aliases[index]
	}

	fn update_alias(&mut self, index: usize, alias: &AliasConfig) {
		self.aliases[index] = *alias;
	}

	fn address_count(&self) -> usize {
		self.addresses.len()
	}

	fn address(&self, index: usize) -> AddressEntry {
		self.addresses[index]
	}

	fn update_address(&mut self, index: usize, entry: &AddressEntry) {
		self.addresses[index] = *entry;
	}

	fn domain(&self, index: usize) -> DomainConfig {
		self.domains[index]
	}

	fn update_domain(&mut self, index: usize, domain: &DomainConfig, _clone: bool) {
		self.domains[index] = *domain;
	}

	fn non_group_receive_timer(&self) -> u8 {
		self.non_group_timer
	}

	fn set_non_group_receive_timer(&mut self, timer: u8) {
		self.non_group_timer = timer;
	}

	fn send(
		&mut self,
		service: ServiceType,
		destination: &Destination,
		repeats: u8,
		code: u8,
		payload: &[u8],
	) {
		self.shared.frames.borrow_mut().push(Frame {
			service,
			destination: *destination,
			repeats,
			code,
			payload: payload.to_vec(),
		});
	}

	fn send_response(&mut self, correlator: Correlator, code: u8, payload: &[u8]) {
		self.shared
			.responses
			.borrow_mut()
			.push((correlator, code, payload.to_vec()));
	}

	fn send_service_pin(&mut self) {
		*self.shared.service_pins.borrow_mut() += 1;
	}

	fn go_configured_online(&mut self) {
		self.online += 1;
	}

	fn reset(&mut self) {
		*self.shared.resets.borrow_mut() += 1;
	}

	fn read_segment(&mut self, segment: Segment) -> Option<Vec<u8>> {
		self.shared.segments.borrow()[segment_slot(segment)].clone()
	}

	fn write_segment(&mut self, segment: Segment, image: &[u8]) {
		self.shared.segments.borrow_mut()[segment_slot(segment)] = Some(image.to_vec());
	}
}

fn segment_slot(segment: Segment) -> usize {
	match segment {
		Segment::Persistent => 0,
		Segment::ConnectionTable => 1,
	}
}

/// An application that accepts invitations for one fixed assembly and
/// records every UI event.
pub struct TestApp {
	pub accept: Option<u8>,
	pub width: u8,
	pub heartbeat: Rc<Cell<bool>>,
	pub events: Rc<RefCell<Vec<(Event, u8)>>>,
}

impl TestApp {
	pub fn new(accept: Option<u8>) -> Self {
		Self {
			accept,
			width: 1,
			heartbeat: Rc::new(Cell::new(false)),
			events: Rc::new(RefCell::new(Vec::new())),
		}
	}

	pub fn has_event(&self, event: Event) -> bool {
		self.events.borrow().iter().any(|(e, _)| *e == event)
	}

	pub fn count_event(&self, event: Event) -> usize {
		self.events.borrow().iter().filter(|(e, _)| *e == event).count()
	}
}

impl Application for TestApp {
	fn assembly(
		&mut self,
		_nvs: &dyn NvDirectory,
		_csmo: &CsmoData,
		_automatic: bool,
		previous: Option<u8>,
	) -> Option<u8> {
		if previous.is_none() {
			self.accept
		} else {
			None
		}
	}

	fn width(&mut self, _assembly: u8) -> u8 {
		self.width
	}

	fn query_heartbeat(&mut self, _nv_index: usize) -> bool {
		self.heartbeat.get()
	}

	fn update_user_interface(&mut self, event: Event, parameter: u8) {
		self.events.borrow_mut().push((event, parameter));
	}
}

/// The standard two-domain test configuration.
pub fn config(kind: Kind, connection_table_size: usize) -> Config {
	Config {
		kind,
		flags: Flags::empty(),
		connection_table_size,
		domain_id: DomainId::new(&[0x49, 0x53]).unwrap(),
		repeat_count: 3,
		app_signature: 0x1509,
		subnet: None,
		node: None,
		derived_address: false,
	}
}

/// A started engine plus handles onto its shared stack state and events.
pub struct Device {
	pub engine: Engine<TestStack, TestApp>,
	pub shared: Rc<Shared>,
	pub events: Rc<RefCell<Vec<(Event, u8)>>>,
	pub heartbeat: Rc<Cell<bool>>,
	pub unique_id: UniqueId,
}

impl Device {
	pub fn new(uid: u8, kind: Kind, accept: Option<u8>) -> Self {
		Self::with_config(uid, accept, config(kind, 8))
	}

	pub fn with_config(uid: u8, accept: Option<u8>, config: Config) -> Self {
		let stack = TestStack::new(uid, 4);
		let shared = stack.shared.clone();
		let unique_id = stack.unique_id;
		let app = TestApp::new(accept);
		let events = app.events.clone();
		let heartbeat = app.heartbeat.clone();
		let engine = Engine::start(stack, app, config).unwrap();
		Self {
			engine,
			shared,
			events,
			heartbeat,
			unique_id,
		}
	}

	pub fn drain(&self) -> Vec<Frame> {
		self.shared.frames.replace(Vec::new())
	}

	/// Feeds frames into this device, honoring unique-id addressing.
	pub fn deliver(&mut self, frames: &[Frame]) {
		for frame in frames {
			if let Destination::UniqueId { unique_id, .. } = frame.destination {
				if unique_id != self.unique_id {
					continue;
				}
			}
			self.engine.filter_msg(frame.code, &frame.payload, 1);
		}
	}

	pub fn tick(&mut self, ticks: u32) {
		for _ in 0..ticks {
			self.engine.tick();
		}
	}

	pub fn has_event(&self, event: Event) -> bool {
		self.events.borrow().iter().any(|(e, _)| *e == event)
	}
}

/// Runs a full manual enrollment between a host and one guest, leaving both
/// sides implemented. The host offers `assembly` on both devices.
pub fn run_manual_enrollment(host: &mut Device, guest: &mut Device, assembly: u8) {
	host.engine.open_enrollment(assembly).unwrap();
	guest.deliver(&host.drain());
	guest.engine.create_enrollment(assembly).unwrap();
	host.deliver(&guest.drain());
	host.engine.create_enrollment(assembly).unwrap();
	guest.deliver(&host.drain());
}
