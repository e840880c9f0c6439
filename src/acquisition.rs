//! Domain acquisition, device side (ISI-DA).
//!
//! The device broadcasts DIDRQ on the secondary domain, collects DIDRM
//! responses, has the server wink for operator confirmation and adopts the
//! domain carried by the matching DIDCF. The retry ladder runs off the
//! shared timeout timer; the group field doubles as the retry counter.

use isi_spec::msg::{Didrm, Didrq};
use isi_spec::record::ConnectionState;
use isi_spec::{Code, DIDRQ_PAUSE, DIDRQ_RETRIES, NO_ASSEMBLY, T_CF, T_COLL, T_RM};
use zerocopy::AsBytes;

use crate::app::{AbortReason, Application, Diagnostic, Event};
use crate::engine::{read_padded, State, PRIMARY_DOMAIN, SECONDARY_DOMAIN};
use crate::stack::{Segment, Stack};
use crate::{Engine, Error};

impl<S: Stack, A: Application> Engine<S, A> {
	/// Starts domain acquisition.
	///
	/// Unless the service pin is shared with the registration button (in
	/// which case the stack broadcast it already), a service-pin message
	/// goes out first — servers assume donors announce themselves that
	/// way, and it keeps the installation gesture identical in managed
	/// networks.
	pub fn acquire_domain(&mut self, shared_service_pin: bool) -> Result<(), Error> {
		if !shared_service_pin {
			self.stack.send_service_pin();
		}
		if !self.running {
			return Err(Error::NotRunning);
		}
		if self.state.is_empty() {
			self.group = DIDRQ_RETRIES;
			self.acquire_domain_step();
		}
		Ok(())
	}

	/// One round of the acquisition process: broadcast DIDRQ and await a
	/// DIDRM.
	pub(crate) fn acquire_domain_step(&mut self) {
		let didrq = Didrq {
			unique_id: self.stack.unique_id(),
			nuid: self.persist.nuid,
		};
		debug!("requesting domain id, {} retries left", self.group);
		self.broadcast(Code::Didrq, SECONDARY_DOMAIN, 3, didrq.as_bytes());
		self.update_ui_and_state_timeout(T_RM, State::AWAIT_DIDRX, Event::Registered, 0);
	}

	/// Forces the acquisition side of the engine back to normal.
	pub fn cancel_acquisition(&mut self) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		self.state.remove(State::ACQUISITION_STATES);
		self.timeout = 0;
		self.das.clear_procedure();
		self.last_didrm = None;
		self.update_ui(Event::Normal);
		Ok(())
	}

	/// The tick handler of an ISI-DA engine.
	pub(crate) fn tick_da(&mut self) {
		self.tick_s();
		if !self.running {
			return;
		}

		if self.timeout == 1 {
			if self
				.state
				.intersects(State::AWAIT_DIDRX | State::AWAIT_CONFIRM)
			{
				// Either no DIDRM answered the request, or the operator
				// never confirmed within the window.
				if self.group > 0 {
					self.state = State::PAUSE;
					self.timeout = DIDRQ_PAUSE;
				} else {
					self.update_ui_and_state_timeout(
						0,
						State::empty(),
						Event::Aborted,
						AbortReason::Unsuccessful.into(),
					);
				}
			} else if self.state == State::PAUSE {
				self.group -= 1;
				self.acquire_domain_step();
				self.update_ui_and_state_timeout(
					T_RM,
					State::AWAIT_DIDRX,
					Event::Retry,
					self.group,
				);
			} else if self.state == State::COLLECT {
				// The collection window closed on a consistent set of
				// DIDRM; have the server wink and await the confirmation.
				self.update_ui_and_state_timeout(T_CF, State::AWAIT_CONFIRM, Event::Wink, 0);
			}
		}

		self.tcsmr_tick();
	}

	/// The message consumer of an ISI-DA engine.
	pub(crate) fn process_msg_da(&mut self, data: &[u8]) -> bool {
		if !self.process_msg_s(data) {
			return false;
		}
		let Ok(code) = Code::try_from(data[0]) else {
			return true;
		};
		let body = &data[1..];

		match code {
			Code::Didrm => {
				let didrm = read_padded::<Didrm>(body);
				if self.state == State::AWAIT_DIDRX {
					// The first response: cache it whole (the timing fields
					// are used once the confirmation arrives) and collect
					// for a while to detect competing servers.
					self.last_didrm = Some(didrm);
					self.state = State::COLLECT;
					self.timeout = T_COLL;
				} else if self.state.intersects(State::COLLECT | State::AWAIT_CONFIRM)
					&& self
						.last_didrm
						.is_some_and(|cached| !cached.matches_domain(&didrm))
				{
					// Responses from a different domain mean several
					// servers are in acquisition mode; bail out. Redundant
					// servers for the same domain are fine.
					self.update_ui_and_state_timeout(
						0,
						State::empty(),
						Event::Aborted,
						AbortReason::MismatchingDidrm.into(),
					);
				}
				false
			}
			Code::Didcf if self.state == State::AWAIT_CONFIRM => {
				let didcf = read_padded::<Didrm>(body);
				match self.last_didrm {
					Some(cached) if cached.matches_domain(&didcf) => self.adopt_didcf(&cached),
					_ => {
						// A confirmation for a different domain can only
						// come from an alien server; play safe.
						self.update_ui_and_state_timeout(
							0,
							State::empty(),
							Event::Aborted,
							AbortReason::MismatchingDidcf.into(),
						);
					}
				}
				self.schedule_csmr_burst();
				false
			}
			// A DA device never honors DIDRQ, but swallows them quietly:
			// concurrent acquisitions elsewhere must not abort ours.
			Code::Didrq => false,
			_ => true,
		}
	}

	/// Adopts the confirmed domain: program the primary domain, announce
	/// ourselves, and take over the server's timing guidance.
	fn adopt_didcf(&mut self, didrm: &Didrm) {
		let len = didrm.did_length();
		let id = didrm.domain_id;
		info!("registered on domain, subnet {} node {}", didrm.subnet, didrm.node);
		if self.set_domain(PRIMARY_DOMAIN, &id[..len], didrm.subnet, didrm.node) {
			self.conditional_diagnostics(Diagnostic::SubnetNodeAllocation, PRIMARY_DOMAIN);
		}
		self.send_drum();
		self.receive_timg(didrm.device_count, didrm.channel_type);
		self.update_ui(Event::Registered);
		self.update_ui_and_state_timeout(0, State::empty(), Event::Normal, NO_ASSEMBLY);
	}

	/// After a DIDCF, every automatic locally hosted connection is marked
	/// for a CSMR re-send, so the newly registered device can join swiftly
	/// instead of waiting for the regular broadcast rotation.
	fn schedule_csmr_burst(&mut self) {
		let mut marked = false;
		for index in 0..self.connections.len() {
			let mut record = self.connections.get(index);
			if record.state() == ConnectionState::InUse
				&& record.has_local_host()
				&& record.is_automatic_head()
			{
				record.set_state(ConnectionState::TcsmrPending);
				self.connections.set(index, &record);
				marked = true;
			}
		}
		if marked {
			self.save_segment(Segment::ConnectionTable);
		}
		// A running timer is simply re-triggered.
		if marked || self.tcsmr > 0 {
			self.arm_tcsmr();
		}
	}
}
