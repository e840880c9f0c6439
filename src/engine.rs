//! The engine value: bundled volatile and persistent state, lifecycle and
//! message dispatch.
//!
//! One engine serves one device. The cooperative scheduling model keeps the
//! bundle zero-cost: the host calls [`Engine::tick`] every 250 ms and feeds
//! inbound frames to [`Engine::process_msg`]; nothing inside suspends.

use isi_spec::msg::{Csmi, CsmoData, Didrm, Drum};
use isi_spec::record::ConnectionState;
use isi_spec::{ChannelType, Code, UniqueId, DEFAULT_DEVICE_COUNT, DOMAIN_ID_LEN, NO_ASSEMBLY, TICKS_PER_SECOND};
use zerocopy::{AsBytes, FromBytes};

use crate::app::{Application, Diagnostic, Event};
use crate::connection::ConnectionTable;
use crate::das::DasState;
use crate::error::Error;
use crate::persist::{self, BootType, PersistentState};
use crate::rand::Rng;
use crate::scheduler::Periodic;
use crate::stack::{Correlator, Destination, DomainConfig, Segment, ServiceType, Stack};
use crate::transport::{self, Transport, SUBNET_BUCKET_SIZE};

/// Primary domain table index.
pub(crate) const PRIMARY_DOMAIN: u8 = 0;
/// Secondary domain table index; ISI uses it for acquisition.
pub(crate) const SECONDARY_DOMAIN: u8 = 1;

/// Engine variants.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Kind {
	/// Self-installation only.
	S,
	/// Self-installation with domain acquisition.
	Da,
	/// Domain address server.
	Das,
}

bitflags! {
	/// Engine configuration flags.
	#[derive(PartialEq, Eq, Clone, Copy, Debug)]
	pub struct Flags: u8 {
		/// Forward [`Diagnostic`] events to the application.
		const SUPPLY_DIAGNOSTICS = 0x01;
		/// Offer broadcast slots to the application.
		const APPLICATION_PERIODIC = 0x02;
		/// Send the extended message forms.
		const EXTENDED_MESSAGES = 0x04;
		/// Do not manage the primary domain address.
		const DISABLE_ADDRESS_MANAGEMENT = 0x08;
		/// Honor the controlled-enrollment side channel.
		const CONTROLLED_ENROLLMENT = 0x10;
	}
}

bitflags! {
	/// The volatile state mask. Enrollment and acquisition bits coexist so a
	/// turnaround device can be host and member concurrently.
	#[derive(PartialEq, Eq, Clone, Copy, Debug)]
	pub(crate) struct State: u8 {
		/// About to become a host; nobody answered yet.
		const INVITING = 0x01;
		/// About to become a host; at least one guest accepted.
		const PLANNED_PARTY = 0x02;
		/// Invited, not yet accepted.
		const INVITED = 0x04;
		/// Invited and accepted.
		const ACCEPTED = 0x08;
		/// DA: awaiting DIDRM. DAS: awaiting DIDRQ.
		const AWAIT_DIDRX = 0x10;
		/// DA: awaiting DIDCF. DAS: awaiting the confirming operator call.
		const AWAIT_CONFIRM = 0x20;
		/// DA: collecting DIDRM. DAS: collecting service-pin messages.
		const COLLECT = 0x40;
		/// DAS: awaiting a query-domain response. DA: retry pause.
		const AWAIT_QDR = 0x80;

		const HOST_STATES = 0x03;
		const GUEST_STATES = 0x0c;
		const CONNECTION_STATES = 0x0f;
		const ACQUISITION_STATES = 0xf0;
	}
}

impl State {
	/// The DA retry pause shares the bit with the DAS query-domain wait.
	pub(crate) const PAUSE: State = State::AWAIT_QDR;
}

/// A caller-provided domain id.
#[derive(Default, PartialEq, Eq, Clone, Copy, Debug)]
pub struct DomainId {
	pub bytes: [u8; DOMAIN_ID_LEN],
	pub len: u8,
}

impl DomainId {
	pub fn new(id: &[u8]) -> Result<Self, Error> {
		if id.len() > DOMAIN_ID_LEN {
			return Err(Error::InvalidParameter);
		}
		let mut bytes = [0; DOMAIN_ID_LEN];
		bytes[..id.len()].copy_from_slice(id);
		Ok(Self {
			bytes,
			len: id.len() as u8,
		})
	}

	fn as_slice(&self) -> &[u8] {
		&self.bytes[..usize::from(self.len)]
	}
}

/// Start-time engine configuration.
#[derive(Clone, Copy, Debug)]
pub struct Config {
	pub kind: Kind,
	pub flags: Flags,
	/// Connection table size, clamped to 1..=256.
	pub connection_table_size: usize,
	/// The primary domain id.
	pub domain_id: DomainId,
	/// NV update repeats, clamped to 1..=3.
	pub repeat_count: u8,
	/// Distinguishes this application's persistence images.
	pub app_signature: u32,
	/// Pins the primary subnet instead of random bucket allocation.
	pub subnet: Option<u8>,
	/// Pins the primary node id instead of random allocation.
	pub node: Option<u8>,
	/// The primary address (and id, when managed) derive from a local
	/// network address; suppresses collision re-allocation.
	pub derived_address: bool,
}

/// The ISI engine.
pub struct Engine<S: Stack, A: Application> {
	pub(crate) stack: S,
	pub(crate) app: A,
	pub(crate) kind: Kind,
	pub(crate) flags: Flags,
	pub(crate) rng: Rng,
	pub(crate) persist: PersistentState,
	pub(crate) connections: ConnectionTable,

	pub(crate) running: bool,
	pub(crate) state: State,
	pub(crate) channel_type: ChannelType,
	pub(crate) transport: Transport,
	/// Ticks until the next broadcast slot.
	pub(crate) wait: u32,
	/// Ticks since start, saturating at 0xffff; only advances while idle.
	pub(crate) startup: u32,
	/// Countdown; 1 means due, 0 means off.
	pub(crate) timeout: u32,
	pub(crate) short_timer: u32,
	/// The group of the enrollment in flight; doubles as the acquisition
	/// retry counter.
	pub(crate) group: u8,
	/// Ticks since the last recognized inbound ISI frame.
	pub(crate) spreading: u32,
	pub(crate) periodic: Periodic,
	/// First record of the enrollment under negotiation.
	pub(crate) pending_connection: Option<usize>,
	/// One-shot early DRUM countdown.
	pub(crate) special_drum: u32,
	/// CSMR burst countdown following a DIDCF.
	pub(crate) tcsmr: u32,
	/// Round-robin cursor of the heartbeat slot class.
	pub(crate) next_heartbeat: usize,

	/// DA: the DIDRM collected for the acquisition in flight.
	pub(crate) last_didrm: Option<Didrm>,
	pub(crate) das: DasState,

	pub(crate) primary_did: DomainId,
	pub(crate) custom_subnet: Option<u8>,
	pub(crate) custom_node: Option<u8>,
	pub(crate) derived_address: bool,
	pub(crate) app_signature: u32,
	repeat_count_config: u8,
}

impl<S: Stack, A: Application> Engine<S, A> {
	/// Creates and starts the engine.
	///
	/// Persistent state is restored from the stack's storage segments; a
	/// missing or damaged image falls back to a reboot-level
	/// initialization.
	pub fn start(mut stack: S, app: A, config: Config) -> Result<Self, Error> {
		if config.domain_id.len == 3
			&& (config.domain_id.bytes[0] == 0x00 || config.domain_id.bytes[0] == 0x0a)
			&& !config.derived_address
		{
			return Err(Error::InvalidDomain);
		}

		let seed = stack.seed();
		let mut engine = Engine {
			stack,
			app,
			kind: config.kind,
			flags: config.flags,
			rng: Rng::from_seed(seed),
			persist: PersistentState {
				devices: DEFAULT_DEVICE_COUNT,
				nuid: 0,
				serial: 0,
				boot_type: BootType::Restart,
				repeat_count: 3,
			},
			connections: ConnectionTable::new(config.connection_table_size),
			running: false,
			state: State::empty(),
			channel_type: ChannelType::TpFt,
			transport: *transport::profile(ChannelType::TpFt),
			wait: 0,
			startup: 0,
			timeout: 0,
			short_timer: 0,
			group: 0,
			spreading: 0,
			periodic: Periodic::default(),
			pending_connection: None,
			special_drum: 0,
			tcsmr: 0,
			next_heartbeat: 0,
			last_didrm: None,
			das: DasState::default(),
			primary_did: config.domain_id,
			custom_subnet: config.subnet,
			custom_node: config.node,
			derived_address: config.derived_address,
			app_signature: config.app_signature,
			repeat_count_config: config.repeat_count,
		};

		engine.restore_persistence();
		engine.initialize();

		if engine.kind == Kind::Das {
			engine.init_device_count_estimation();
		}

		info!(
			"engine started as {:?}, {} connection records, nuid {}",
			engine.kind,
			engine.connections.len(),
			engine.persist.nuid
		);
		Ok(engine)
	}

	/// Stops the engine, saving persistent state. The volatile state is
	/// zeroed; a subsequent [`Engine::start`] on the same storage resumes
	/// with a normal restart.
	pub fn stop(mut self) -> (S, A) {
		self.save_segment(Segment::Persistent);
		self.save_segment(Segment::ConnectionTable);
		self.running = false;
		self.state = State::empty();
		info!("engine stopped");
		(self.stack, self.app)
	}

	/// Wipes every table the engine manages and schedules a reboot-level
	/// reinitialization. The CID serial survives; resetting it would risk
	/// connection leaks.
	pub fn return_to_factory_defaults(&mut self) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		info!("returning to factory defaults");
		self.persist.boot_type = BootType::Reboot;
		self.flags = Flags::empty();
		self.initialize();
		self.stack.reset();
		Ok(())
	}

	pub fn is_running(&self) -> bool {
		self.running
	}

	/// The initialization depth the most recent start performed.
	pub fn boot_type(&self) -> BootType {
		self.persist.boot_type
	}

	/// The engine's view of the link stack.
	pub fn stack(&self) -> &S {
		&self.stack
	}

	pub fn stack_mut(&mut self) -> &mut S {
		&mut self.stack
	}

	pub fn application(&self) -> &A {
		&self.app
	}

	pub fn connection_table_size(&self) -> usize {
		self.connections.len()
	}

	pub fn connection(&self, index: usize) -> Option<isi_spec::record::ConnectionRecord> {
		self.connections.record(index)
	}

	/// Drives the engine; call every 250 ms.
	pub fn tick(&mut self) {
		match self.kind {
			Kind::S => self.tick_s(),
			Kind::Da => self.tick_da(),
			Kind::Das => self.tick_das(),
		}
	}

	fn restore_persistence(&mut self) {
		let restored = match self.stack.read_segment(Segment::Persistent) {
			Some(image) => match persist::unwrap(self.app_signature, &image) {
				Ok(payload) => self.persist.deserialize(payload).is_ok(),
				Err(loss) => {
					warn!("persistent segment discarded: {loss:?}");
					false
				}
			},
			None => false,
		};
		if !restored {
			self.persist.boot_type = BootType::Reboot;
			return;
		}

		if self.persist.boot_type == BootType::Restart {
			let table_ok = match self.stack.read_segment(Segment::ConnectionTable) {
				Some(image) => match persist::unwrap(self.app_signature, &image) {
					Ok(payload) => self.connections.restore(payload),
					Err(loss) => {
						warn!("connection table segment discarded: {loss:?}");
						false
					}
				},
				None => false,
			};
			if !table_ok {
				self.persist.boot_type = BootType::Reboot;
			}
		}
	}

	/// (Re-)initializes the engine according to the current boot type.
	pub(crate) fn initialize(&mut self) {
		self.state = State::empty();
		self.wait = 0;
		self.startup = 0;
		self.timeout = 0;
		self.short_timer = 0;
		self.group = 0;
		self.spreading = 0;
		self.periodic = Periodic::default();
		self.special_drum = 0;
		self.tcsmr = 0;
		self.last_didrm = None;
		self.das.clear_procedure();

		if self.persist.boot_type == BootType::Reboot {
			self.persist.devices = DEFAULT_DEVICE_COUNT;
			for index in 0..self.stack.address_count() {
				self.stack
					.update_address(index, &crate::stack::AddressEntry::Unbound);
			}
			for index in 0..self.stack.alias_count() {
				self.stack
					.update_alias(index, &crate::stack::AliasConfig::UNUSED);
			}
			for index in 0..self.stack.nv_count() {
				let mut nv = self.stack.nv_config(index);
				let unbound = crate::stack::NvConfig::unbound(index);
				nv.selector = unbound.selector;
				nv.address_index = unbound.address_index;
				self.stack.update_nv_config(index, &nv);
			}
		}

		// The standard program id carries the channel type; otherwise
		// assume the slowest supported channel.
		let program_id = self.stack.program_id();
		self.channel_type = if program_id[0] & 0x80 != 0 {
			ChannelType::try_from(program_id[6]).unwrap_or(ChannelType::Pl20N)
		} else {
			ChannelType::Pl20N
		};
		self.select_transport(self.channel_type);

		// The secondary domain gets a random subnet/node pair so that
		// DIDRM messages from redundant servers are not mistaken for
		// duplicates by transaction-id aliasing.
		let subnet = self.rng.bounded(254, 1) as u8;
		let node = self.rng.bounded(126, 1) as u8;
		self.set_domain(SECONDARY_DOMAIN, &[], subnet, node);

		if self.persist.boot_type < BootType::Restart {
			self.connections.clear_all();
			self.persist.nuid = self.rng.bounded(256, 0) as u8;
			self.verify_domains();
		} else {
			let configured = self.stack.domain(usize::from(PRIMARY_DOMAIN));
			if configured.len != self.primary_did.len
				|| configured.id[..usize::from(configured.len)] != *self.primary_did.as_slice()
			{
				debug!("primary domain changed, reprogramming");
				self.verify_domains();
			}
		}

		// Latched at initialization only: once a connection exists, the
		// repeat count is burned into address-table entries.
		self.persist.repeat_count = (self.repeat_count_config & 0x03).max(1);

		// The first slot stays clear of the reset burst after a site-wide
		// power-up.
		self.wait = 5 * TICKS_PER_SECOND + self.alloc_slot(self.persist.devices);

		// The early DRUM helps discovery when the first regular slot is
		// far out; drop it when the broadcaster would come first anyway.
		self.special_drum =
			self.rng.bounded(u32::from(self.persist.devices) / 3, 5) * TICKS_PER_SECOND;
		if self.special_drum >= self.wait {
			self.special_drum = 0;
		}

		self.running = true;
		self.persist.boot_type = BootType::Restart;
		self.pending_connection = None;
		self.save_segment(Segment::Persistent);
		self.save_segment(Segment::ConnectionTable);
	}

	/// Programs both domain table entries to their ISI defaults.
	pub(crate) fn verify_domains(&mut self) {
		let subnet = self.subnet();
		let node = self.node();
		let did = self.primary_did;
		if self.set_domain(PRIMARY_DOMAIN, did.as_slice(), subnet, node) {
			self.conditional_diagnostics(Diagnostic::SubnetNodeAllocation, PRIMARY_DOMAIN);
		}
	}

	/// Programs one domain table entry; answers whether it changed.
	pub(crate) fn set_domain(&mut self, index: u8, id: &[u8], subnet: u8, node: u8) -> bool {
		let current = self.stack.domain(usize::from(index));
		let mut domain = DomainConfig {
			id: [0; DOMAIN_ID_LEN],
			len: id.len() as u8,
			subnet,
			node,
			key: current.key,
		};
		domain.id[..id.len()].copy_from_slice(id);

		if domain == current {
			return false;
		}
		if index == SECONDARY_DOMAIN {
			self.stack.update_domain(usize::from(index), &domain, true);
		} else {
			self.stack.update_domain(usize::from(index), &domain, false);
			self.stack.go_configured_online();
		}
		true
	}

	pub(crate) fn alloc_subnet(&mut self) -> u8 {
		self.rng.bounded(SUBNET_BUCKET_SIZE, self.transport.base_subnet) as u8
	}

	pub(crate) fn alloc_node(&mut self) -> u8 {
		self.rng.bounded(124, 2) as u8
	}

	pub(crate) fn subnet(&mut self) -> u8 {
		match self.custom_subnet {
			Some(subnet) => subnet,
			None => self.alloc_subnet(),
		}
	}

	pub(crate) fn node(&mut self) -> u8 {
		match self.custom_node {
			Some(node) => node,
			None => self.alloc_node(),
		}
	}

	pub(crate) fn save_segment(&mut self, segment: Segment) {
		let payload = match segment {
			Segment::Persistent => self.persist.serialize().to_vec(),
			Segment::ConnectionTable => self.connections.image(),
		};
		let image = persist::wrap(self.app_signature, &payload);
		self.stack.write_segment(segment, &image);
	}

	//
	// Message approval and dispatch.
	//

	/// First filter: whether an incoming application message looks like an
	/// ISI message the engine will consume.
	pub fn approve_msg(&self, code: u8, data: &[u8]) -> bool {
		if !self.running || code != isi_spec::APPLICATION_CODE || data.is_empty() {
			return false;
		}
		// Testing the entire code byte also verifies that the protocol
		// version bits are zero.
		let Ok(isi_code) = Code::try_from(data[0]) else {
			return false;
		};
		let expected = isi_code.expected_len();
		data.len() >= expected && data.len() <= expected + isi_spec::MESSAGE_HEADROOM
	}

	/// DAS variant of [`Engine::approve_msg`]: additionally approves
	/// service-pin messages while collecting for a fetch procedure.
	pub fn approve_msg_das(&self, code: u8, data: &[u8]) -> bool {
		self.approve_msg(code, data)
			|| (self.running
				&& self.state.contains(State::COLLECT)
				&& code == crate::stack::lontalk::SERVICE_PIN_MESSAGE)
	}

	/// Negative-logic consumer: processes one approved inbound message and
	/// returns `true` iff the message was left for the application.
	pub fn process_msg(&mut self, code: u8, data: &[u8]) -> bool {
		if data.is_empty() {
			return true;
		}
		match self.kind {
			Kind::S => self.process_msg_s(data),
			Kind::Da => self.process_msg_da(data),
			Kind::Das => self.process_msg_das(code, data),
		}
	}

	/// The message consumer shared by every engine variant.
	pub(crate) fn process_msg_s(&mut self, data: &[u8]) -> bool {
		self.spreading = 0;

		let Ok(code) = Code::try_from(data[0]) else {
			return true;
		};
		let body = &data[1..];
		trace!("rx {code:?}, {} bytes", data.len());

		match code {
			// ISI ignores the extended DRUM fields.
			Code::Drum | Code::DrumEx => self.receive_drum_s(&read_padded::<Drum>(body)),
			Code::Timg => {
				let timg = read_padded::<isi_spec::msg::Timg>(body);
				self.receive_timg(timg.device_count, timg.channel_type);
			}
			Code::Csmo | Code::CsmoEx | Code::Csma | Code::CsmaEx | Code::Csmr | Code::CsmrEx => {
				let mut csmo = read_padded::<isi_spec::msg::Csmo>(body);
				if code.is_short_form() {
					// Short forms imply defaults for the extension fields.
					csmo.data.extended = Default::default();
					csmo.data.extended.member = 1;
				}
				self.receive_csmo(code.is_automatic(), &csmo);
			}
			Code::Csmx => self.receive_csmx(&read_padded(body)),
			Code::Csmc => self.receive_csmc(&read_padded(body)),
			Code::Csme => self.receive_csme(&read_padded(body)),
			Code::Csmd => self.receive_csmd(&read_padded(body)),
			Code::Csmi => self.receive_csmi(&read_padded::<Csmi>(body)),
			_ => return true,
		}
		false
	}

	/// Convenience wrapper combining approval, dispatch and the controlled
	/// enrollment side channel; answers whether the engine consumed the
	/// message.
	pub fn filter_msg(&mut self, code: u8, data: &[u8], correlator: Correlator) -> bool {
		let approved = match self.kind {
			Kind::Das => self.approve_msg_das(code, data),
			_ => self.approve_msg(code, data),
		};
		approved
			&& (!self.process_msg(code, data)
				|| self.process_ctrl_enrollment_request(code, data, correlator))
	}

	//
	// Outbound plumbing.
	//

	/// Broadcasts an ISI message on the given domain index with
	/// unacknowledged-repeated service. `body` is the full message
	/// structure; short forms are cut to their declared length.
	pub(crate) fn broadcast(&mut self, code: Code, domain: u8, repeats: u8, body: &[u8]) {
		let length = code.expected_len() - 1;
		debug_assert!(body.len() >= length);
		let mut frame = [0u8; 64];
		frame[0] = code.into();
		frame[1..=length].copy_from_slice(&body[..length]);
		trace!("tx {code:?} on domain {domain}");
		self.stack.send(
			ServiceType::Repeated,
			&Destination::Broadcast { domain },
			repeats,
			isi_spec::APPLICATION_CODE,
			&frame[..=length],
		);
	}

	/// Sends an ISI message to a unique-id destination.
	pub(crate) fn send_isi(
		&mut self,
		service: ServiceType,
		destination: &Destination,
		repeats: u8,
		code: Code,
		body: &[u8],
	) {
		let length = code.expected_len() - 1;
		debug_assert!(body.len() >= length);
		let mut frame = [0u8; 64];
		frame[0] = code.into();
		frame[1..=length].copy_from_slice(&body[..length]);
		self.stack.send(
			service,
			destination,
			repeats,
			isi_spec::APPLICATION_CODE,
			&frame[..=length],
		);
	}

	pub(crate) fn nid_destination(&self, domain: u8, unique_id: UniqueId) -> Destination {
		Destination::UniqueId { domain, unique_id }
	}

	//
	// UI helpers.
	//

	pub(crate) fn update_ui(&mut self, event: Event) {
		self.app.update_user_interface(event, NO_ASSEMBLY);
	}

	pub(crate) fn update_ui_param(&mut self, event: Event, parameter: u8) {
		self.app.update_user_interface(event, parameter);
	}

	pub(crate) fn update_ui_normal(&mut self) {
		self.update_ui(Event::Normal);
	}

	pub(crate) fn update_ui_and_state(&mut self, state: State, event: Event, parameter: u8) {
		self.state = state;
		self.app.update_user_interface(event, parameter);
	}

	pub(crate) fn update_ui_and_state_timeout(
		&mut self,
		timeout: u32,
		state: State,
		event: Event,
		parameter: u8,
	) {
		self.timeout = timeout;
		self.update_ui_and_state(state, event, parameter);
	}

	pub(crate) fn update_ui_and_state_enroll(&mut self, state: State, event: Event, parameter: u8) {
		self.update_ui_and_state_timeout(isi_spec::T_ENROLL, state, event, parameter);
	}

	pub(crate) fn conditional_diagnostics(&mut self, event: Diagnostic, parameter: u8) {
		if self.flags.contains(Flags::SUPPLY_DIAGNOSTICS) {
			self.app.update_diagnostics(event, parameter);
		}
	}

	//
	// Shared protocol helpers.
	//

	/// Pre-fills an invitation with defaults and lets the application
	/// adjust it.
	pub(crate) fn create_csmo(&mut self, assembly: u8) -> CsmoData {
		let mut data = CsmoData::default();
		data.group = self.app.primary_group(assembly);
		data.extended.application[..].copy_from_slice(&self.stack.program_id()[..6]);
		data.set_direction(isi_spec::msg::Direction::Any);
		if let Some(nv_index) = self.app.nv_index(assembly, 0, None) {
			if nv_index < self.stack.nv_count() {
				data.nv_type = self.stack.nv_type(nv_index);
			}
		}
		data.set_width(self.app.width(assembly));
		self.app.create_csmo(assembly, &mut data);
		data
	}

	/// Whether any record in `min_state` or above carries this assembly.
	fn any_connection(&self, assembly: u8, min_state: ConnectionState) -> bool {
		(0..self.connections.len()).any(|index| {
			let record = self.connections.get(index);
			record.state() >= min_state && record.involves(assembly)
		})
	}

	/// Whether the assembly is currently enrolled in a connection.
	pub fn is_connected(&self, assembly: u8) -> bool {
		self.any_connection(assembly, ConnectionState::InUse)
	}

	/// Whether the assembly is enrolled in an automatic connection.
	pub fn is_automatically_enrolled(&self, assembly: u8) -> bool {
		(0..self.connections.len()).any(|index| {
			let record = self.connections.get(index);
			record.state() >= ConnectionState::InUse
				&& record.involves(assembly)
				&& record.is_automatic_head()
		})
	}
}

/// Reads a message structure from a possibly short or oversized body,
/// zero-filling what the frame does not carry.
pub(crate) fn read_padded<T: FromBytes + AsBytes + Default>(data: &[u8]) -> T {
	let mut value = T::default();
	let bytes = value.as_bytes_mut();
	let len = data.len().min(bytes.len());
	bytes[..len].copy_from_slice(&data[..len]);
	value
}
