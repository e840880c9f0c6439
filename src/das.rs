//! The domain address server (ISI-DAS).
//!
//! A DAS answers DIDRQ with DIDRM/DIDCF, announces timing guidance from a
//! live device-count estimate, and can adopt or distribute a domain id by
//! sniffing service-pin messages from a donor device (fetch-domain and
//! fetch-device).

use isi_spec::msg::{Didrm, Didrq, Drum};
use isi_spec::{ChannelType, Code, UniqueId, NO_ASSEMBLY, T_ACQ, T_QDR, T_UDR, UNIQUE_ID_LEN};
use zerocopy::AsBytes;

use crate::app::{AbortReason, Application, Diagnostic, Event};
use crate::engine::{read_padded, State, PRIMARY_DOMAIN, SECONDARY_DOMAIN};
use crate::stack::{lontalk, ServiceType, Stack};
use crate::{Engine, Error};

const INITIAL_CREDIT: u8 = 3;
const STANDARD_CREDIT: u8 = 5;
const STANDARD_DEBIT: u8 = 1;
const MAXIMUM_CREDITS: u8 = 128;
const MINIMUM_ESTIMATE: u8 = 8;

const DIDRM_RETRIES: u8 = 3;
const WINK_REPEATS: u8 = 3;
const QUERY_DOMAIN_RETRIES: u8 = 3;
const UPDATE_DOMAIN_RETRIES: u8 = 3;

bitflags! {
	/// The extended state of the DAS-only procedures.
	#[derive(PartialEq, Eq, Clone, Copy, Debug)]
	pub(crate) struct DasProcedure: u8 {
		/// A DIDRQ from the donor arrived mid-sniffing; satisfy its
		/// acquisition automatically once sniffing completes.
		const AUTO_DEVICE_ACQUISITION = 0x01;
		/// Obtain the donor's domain id for ourselves.
		const FETCH_DOMAIN = 0x02;
		/// Fetch-device, first half: read the donor's domain.
		const FETCH_DEVICE_QUERY = 0x04;
		/// Fetch-device, second half: await the donor's acknowledgment.
		const FETCH_DEVICE_CONFIRM = 0x08;
	}
}

/// DAS-only engine state.
pub(crate) struct DasState {
	/// One credit cell per nuid; non-zero cells count as live devices.
	pub lives: [u8; 256],
	pub procedure: DasProcedure,
	/// The last DIDRQ honored; carries the requester's unique id for
	/// DIDRM/DIDCF addressing.
	pub last_didrq: Didrq,
	/// The sniffing donor's unique id; all zeroes when none.
	pub donor: UniqueId,
	/// Timing and address data latched with the DIDRM, repeated verbatim
	/// in the DIDCF.
	pub didrm_channel: u8,
	pub didrm_devices: u8,
	pub didrm_subnet: u8,
	pub didrm_node: u8,
	/// Test hook: overrides the announced estimate when non-zero.
	pub override_estimate: u8,
}

impl Default for DasState {
	fn default() -> Self {
		Self {
			lives: [0; 256],
			procedure: DasProcedure::empty(),
			last_didrq: Didrq::default(),
			donor: [0; UNIQUE_ID_LEN],
			didrm_channel: 0,
			didrm_devices: 0,
			didrm_subnet: 0,
			didrm_node: 0,
			override_estimate: 0,
		}
	}
}

impl DasState {
	pub fn clear_procedure(&mut self) {
		self.procedure = DasProcedure::empty();
		self.donor = [0; UNIQUE_ID_LEN];
	}

	fn has_donor(&self) -> bool {
		self.donor != [0; UNIQUE_ID_LEN]
	}
}

impl<S: Stack, A: Application> Engine<S, A> {
	/// Seeds the live table from the last known estimate, with credits
	/// cycling 3, 4, 5, so a new server reaches the true device count
	/// within five DRUM cycles.
	pub(crate) fn init_device_count_estimation(&mut self) {
		self.das.lives = [0; 256];
		let mut credit = INITIAL_CREDIT;
		for cell in 0..usize::from(self.persist.devices) {
			self.das.lives[cell] = credit;
			credit += 1;
			if credit > STANDARD_CREDIT {
				credit = INITIAL_CREDIT;
			}
		}
	}

	/// The current device-count estimate.
	///
	/// The live counter underestimates as the population grows (nuids
	/// collide); a progressive fudge factor compensates:
	/// `max(8, min(255, n + 1 + n²/256))`.
	pub fn current_estimate(&self) -> u8 {
		let count = self.das.lives.iter().filter(|&&cell| cell != 0).count() as u32;
		let value = count + 1 + (count * count) / 256;
		value.clamp(u32::from(MINIMUM_ESTIMATE), 255) as u8
	}

	/// The estimate announced in TIMG, honoring the test override.
	pub(crate) fn announced_estimate(&self) -> u8 {
		if self.das.override_estimate != 0 {
			self.das.override_estimate
		} else {
			self.current_estimate()
		}
	}

	/// Overrides the announced estimate; testing only. A non-zero value
	/// re-allocates the slot, as the present wait may be far out under the
	/// previous estimation.
	pub fn set_estimate_override(&mut self, value: u8) {
		self.das.override_estimate = value;
		if value != 0 {
			self.wait = self.alloc_slot(value);
		}
	}

	/// Ages every live cell by the standard debit.
	pub(crate) fn decrement_live_counters(&mut self) {
		for cell in self.das.lives.iter_mut() {
			*cell = cell.saturating_sub(STANDARD_DEBIT);
		}
		let estimate = self.current_estimate();
		if self.persist.devices != estimate {
			self.set_device_count_estimate(estimate);
		}
	}

	/// DAS-side DRUM receiver: credit the sender's nuid, degrade to a
	/// slower channel type if one is seen, then do what every device does
	/// with a DRUM.
	pub(crate) fn receive_drum_das(&mut self, drum: &Drum) {
		let cell = &mut self.das.lives[usize::from(drum.nuid)];
		*cell = (*cell + STANDARD_CREDIT).min(MAXIMUM_CREDITS);

		// Supported channel type numbers ascend with decreasing speed; a
		// slower participant drags the whole channel down.
		if drum.channel_type > u8::from(self.channel_type) {
			if let Ok(channel) = ChannelType::try_from(drum.channel_type) {
				self.channel_type = channel;
				self.select_transport(channel);
			}
		}

		self.receive_drum_s(drum);
	}

	/// The tick handler of an ISI-DAS engine.
	pub(crate) fn tick_das(&mut self) {
		if !self.running {
			return;
		}
		// The startup counter is not gated here; a DAS is always "busy"
		// with its server duties.
		self.common_tick(false);

		let estimate = self.current_estimate();
		if self.persist.devices != estimate {
			self.set_device_count_estimate(estimate);
		}

		if self.timeout == 1 && self.state.intersects(State::ACQUISITION_STATES) {
			// Whatever we waited for — DIDRQ, the confirming call, a
			// service pin, the query-domain response — it did not come.
			self.das.clear_procedure();
			self.update_ui_and_state_timeout(
				0,
				State::empty(),
				Event::Aborted,
				AbortReason::Unsuccessful.into(),
			);
		}

		self.broadcast_scheduler(true);
		self.tcsmr_tick();
	}

	/// The message consumer of an ISI-DAS engine. `code` is the LonTalk
	/// application code: during sniffing, service-pin messages arrive here
	/// too.
	pub(crate) fn process_msg_das(&mut self, code: u8, data: &[u8]) -> bool {
		if self.state.contains(State::COLLECT) && code == lontalk::SERVICE_PIN_MESSAGE {
			self.receive_service_pin(data);
			return false;
		}

		self.spreading = 0;
		let Ok(isi_code) = Code::try_from(data[0]) else {
			return true;
		};
		let body = &data[1..];

		match isi_code {
			Code::Drum | Code::DrumEx => {
				self.receive_drum_das(&read_padded::<Drum>(body));
				false
			}
			Code::Didrq => {
				let didrq = read_padded::<Didrq>(body);
				if self.state.contains(State::AWAIT_DIDRX) {
					// Keep the requester's unique id safe for DIDRM and
					// DIDCF, allocate the device's address, and respond.
					self.das.last_didrq = didrq;
					self.das.didrm_subnet = self.alloc_subnet();
					self.das.didrm_node = self.alloc_node();
					self.send_didrm(Code::Didrm);
					self.state |= State::AWAIT_CONFIRM;
					self.timeout = T_ACQ;
				} else if self.state == State::COLLECT
					&& self.das.has_donor()
					&& self.das.donor == didrq.unique_id
				{
					// The donor shares its service pin with the
					// registration button and started its own acquisition.
					// Flag it; once sniffing completes we satisfy the
					// donor automatically.
					self.das.procedure |= DasProcedure::AUTO_DEVICE_ACQUISITION;
				}
				false
			}
			// An alien TIMG must come from another server; there is no way
			// to merge server knowledge, so leave it unprocessed.
			Code::Timg => true,
			_ => self.process_msg_da(data),
		}
	}

	/// The sniffing processor: the first service-pin message names the
	/// donor and triggers a wink; the second, from the same device,
	/// triggers the query-domain request.
	fn receive_service_pin(&mut self, data: &[u8]) {
		let mut unique_id: UniqueId = [0; UNIQUE_ID_LEN];
		let len = data.len().min(UNIQUE_ID_LEN);
		unique_id[..len].copy_from_slice(&data[..len]);

		if self.das.has_donor() {
			if self.das.donor != unique_id {
				debug!("service pin from a second device, aborting fetch");
				self.das.clear_procedure();
				self.update_ui_and_state_timeout(
					0,
					State::empty(),
					Event::Aborted,
					AbortReason::MismatchService.into(),
				);
				return;
			}
			// The match confirms the donor; ask it for its primary domain.
			// The timeout guards against the response never arriving.
			let destination = self.nid_destination(PRIMARY_DOMAIN, self.das.donor);
			self.stack.send(
				ServiceType::Request,
				&destination,
				QUERY_DOMAIN_RETRIES,
				lontalk::QUERY_DOMAIN_MESSAGE,
				&[PRIMARY_DOMAIN],
			);
			self.state = State::AWAIT_QDR;
			self.timeout = T_QDR;
		} else {
			// The first of two expected service-pin messages: remember the
			// donor and wink at it for the operator to verify.
			self.das.donor = unique_id;
			let destination = self.nid_destination(PRIMARY_DOMAIN, self.das.donor);
			self.stack.send(
				ServiceType::Repeated,
				&destination,
				WINK_REPEATS,
				lontalk::WINK_MESSAGE,
				&[],
			);
			self.timeout = T_ACQ;
		}
	}

	/// Sends a DIDRM or DIDCF to the cached requester, unique-id addressed
	/// on the secondary domain. The DIDCF repeats the DIDRM's data so the
	/// requester can match the two.
	pub(crate) fn send_didrm(&mut self, code: Code) {
		let domain = self.stack.domain(usize::from(PRIMARY_DOMAIN));

		if code == Code::Didrm {
			self.das.didrm_channel = self.channel_type.into();
			self.das.didrm_devices = self.persist.devices;
		}

		let mut didrm = Didrm::default();
		didrm.set_did_length(usize::from(domain.len & 0x07));
		didrm.domain_id = domain.id;
		didrm.subnet = self.das.didrm_subnet;
		didrm.node = self.das.didrm_node;
		didrm.channel_type = self.das.didrm_channel;
		didrm.device_count = self.das.didrm_devices;
		didrm.unique_id = self.stack.unique_id();

		let destination = self.nid_destination(SECONDARY_DOMAIN, self.das.last_didrq.unique_id);
		self.send_isi(
			ServiceType::Repeated,
			&destination,
			DIDRM_RETRIES,
			code,
			didrm.as_bytes(),
		);
	}

	/// Opens (or, in the confirmation state, confirms) device acquisition.
	///
	/// The first call arms the server for DIDRQ; after a request was
	/// answered, the second call confirms that the correct device winked
	/// and fires the DIDCF.
	pub fn start_device_acquisition(&mut self) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		if self.state.is_empty() {
			self.update_ui_and_state_timeout(T_ACQ, State::AWAIT_DIDRX, Event::Registered, 0);
		} else if self.state.contains(State::AWAIT_CONFIRM) {
			self.send_didrm(Code::Didcf);
			self.update_ui(Event::Registered);
			self.update_ui_and_state_timeout(T_ACQ, State::AWAIT_DIDRX, Event::Registered, 0);
		}
		Ok(())
	}

	/// Starts the fetch-domain procedure: adopt a donor device's domain id
	/// by sniffing two service-pin messages from it.
	pub fn fetch_domain(&mut self) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		self.das.procedure = DasProcedure::FETCH_DOMAIN;
		self.start_fetch();
		Ok(())
	}

	/// Starts the fetch-device procedure: push the local domain id into a
	/// donor device, sparing it the DA acquisition protocol.
	pub fn fetch_device(&mut self) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		self.das.procedure = DasProcedure::FETCH_DEVICE_QUERY;
		self.start_fetch();
		Ok(())
	}

	fn start_fetch(&mut self) {
		if self.state.is_empty() {
			self.das.donor = [0; UNIQUE_ID_LEN];
			self.update_ui_and_state_timeout(T_ACQ, State::COLLECT, Event::Registered, 0);
		}
	}

	/// Processes a network-management response while a fetch procedure is
	/// waiting for one. Negative logic: answers `true` iff the response
	/// was left for the application.
	pub fn process_response(&mut self, code: u8, data: &[u8]) -> bool {
		if !self.running || self.state != State::AWAIT_QDR {
			return true;
		}

		match code {
			lontalk::QUERY_DOMAIN_FAILURE | lontalk::UPDATE_DOMAIN_FAILURE => {
				self.das.clear_procedure();
				self.update_ui_and_state_timeout(
					0,
					State::empty(),
					Event::Aborted,
					AbortReason::Unsuccessful.into(),
				);
				false
			}
			lontalk::QUERY_DOMAIN_SUCCESS => self.receive_query_domain_response(data),
			lontalk::UPDATE_DOMAIN_SUCCESS
				if self.das.procedure == DasProcedure::FETCH_DEVICE_CONFIRM =>
			{
				self.finish_fetch();
				false
			}
			_ => true,
		}
	}

	fn receive_query_domain_response(&mut self, data: &[u8]) -> bool {
		// {id[6], subnet, node, len, key[6]}
		if data.len() < 15 {
			return true;
		}
		let mut id = [0u8; 6];
		id.copy_from_slice(&data[..6]);
		let subnet = data[6];
		let node = data[7] & 0x7f;
		let len = usize::from(data[8].min(6));
		let mut key = [0u8; 6];
		key.copy_from_slice(&data[9..15]);

		if self.das.procedure.contains(DasProcedure::FETCH_DOMAIN) {
			// The last step of fetch-domain: assign the donor's id to
			// ourselves and announce it.
			let local_subnet = self.subnet();
			let local_node = self.node();
			if self.set_domain(PRIMARY_DOMAIN, &id[..len], local_subnet, local_node) {
				self.conditional_diagnostics(Diagnostic::SubnetNodeAllocation, PRIMARY_DOMAIN);
			}
			self.send_drum();

			if self
				.das
				.procedure
				.contains(DasProcedure::AUTO_DEVICE_ACQUISITION)
			{
				// The donor tried a domain acquisition of its own while we
				// were sniffing; satisfy it now.
				self.das.last_didrq.unique_id = self.das.donor;
				self.das.didrm_subnet = self.alloc_subnet();
				self.das.didrm_node = self.alloc_node();
				self.send_didrm(Code::Didrm);
				self.send_didrm(Code::Didcf);
			}

			self.finish_fetch();
			false
		} else if self.das.procedure.contains(DasProcedure::FETCH_DEVICE_QUERY) {
			// Fetch-device continues: write the local domain id back into
			// the donor, keeping its subnet, node and key intact.
			let local = self.stack.domain(usize::from(PRIMARY_DOMAIN));
			let local_len = usize::from(local.len & 0x07);

			let mut request = [0u8; 16];
			request[0] = PRIMARY_DOMAIN;
			request[1..7].copy_from_slice(&local.id);
			request[7] = subnet;
			request[8] = 0x80 | node;
			request[9] = local_len as u8;
			request[10..16].copy_from_slice(&key);

			let destination = self.nid_destination(PRIMARY_DOMAIN, self.das.donor);
			self.stack.send(
				ServiceType::Request,
				&destination,
				UPDATE_DOMAIN_RETRIES,
				lontalk::UPDATE_DOMAIN_MESSAGE,
				&request,
			);
			self.das.procedure = DasProcedure::FETCH_DEVICE_CONFIRM;
			self.timeout = T_UDR;
			false
		} else {
			true
		}
	}

	fn finish_fetch(&mut self) {
		self.update_ui(Event::Registered);
		self.das.clear_procedure();
		self.update_ui_and_state_timeout(0, State::empty(), Event::Normal, NO_ASSEMBLY);
	}
}
