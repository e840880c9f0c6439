//! The enrollment state machines.
//!
//! A host opens an enrollment by broadcasting an invitation (CSMO, or CSMA
//! for automatic connections); members accept with CSME; the host confirms
//! with CSMC and both sides bind. CSMX cancels, CSMD deletes, and CSMI both
//! advertises a connection's selectors and resolves selector conflicts.

use isi_spec::msg::{Cid, Csmi, Csmo, CsmoData, Selector};
use isi_spec::record::{ConnectionRecord, ConnectionState};
use isi_spec::{Code, NO_ASSEMBLY, T_AUTO, T_CSMO, T_ENROLL, WIDTH_PER_RECORD};
use smallvec::SmallVec;
use zerocopy::AsBytes;

use crate::app::{Application, Diagnostic, Event, NvCatalog};
use crate::engine::{State, PRIMARY_DOMAIN};
use crate::selector;
use crate::stack::{Segment, Stack};
use crate::{Engine, Error, Flags};

impl<S: Stack, A: Application> Engine<S, A> {
	/// Opens enrollment with the local `assembly` as connection host.
	///
	/// The engine allocates a CID and a free selector range, reserves
	/// connection table space and broadcasts the invitation. The operation
	/// is a quiet no-op while the engine is engaged otherwise.
	pub fn open_enrollment(&mut self, assembly: u8) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		debug!("open enrollment for assembly {assembly}");
		if self.state.is_empty() && !self.become_host(assembly, false, None) {
			return Err(Error::NoConnectionSpace);
		}
		Ok(())
	}

	/// The operator's second press: on the host this implements the
	/// enrollment and confirms it with CSMC; on an invited guest it accepts
	/// the invitation.
	pub fn create_enrollment(&mut self, assembly: u8) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		self.make_enrollment(false, assembly);
		Ok(())
	}

	/// Like [`Engine::create_enrollment`], but the new connection extends
	/// existing bindings through the alias table instead of replacing them.
	pub fn extend_enrollment(&mut self, assembly: u8) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		self.make_enrollment(true, assembly);
		Ok(())
	}

	/// Cancels the pending enrollment on whichever side this device is on.
	/// Idempotent.
	pub fn cancel_enrollment(&mut self) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		if self.state.intersects(State::HOST_STATES) {
			self.send_csmx();
		}
		if self.state.intersects(State::CONNECTION_STATES) {
			// Clearing the pending records is more than strictly needed,
			// but it keeps the next re-sent invitation from being dropped
			// as a duplicate, so a different assembly can be accepted a
			// moment later.
			if let Some(start) = self.pending_connection {
				for index in start..self.connections.len() {
					if self.connections.get(index).state() == ConnectionState::Pending {
						self.connections.clear(index);
					}
				}
			}
			self.save_segment(Segment::ConnectionTable);
			self.update_ui(Event::Cancelled);
			self.state.remove(State::CONNECTION_STATES);
		}
		Ok(())
	}

	/// Opens and immediately implements an automatic enrollment. Only
	/// honored once the warmup phase is over.
	pub fn initiate_auto_enrollment(
		&mut self,
		data: Option<&CsmoData>,
		assembly: u8,
	) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		if self.startup >= T_AUTO && !self.is_automatically_enrolled(assembly) {
			if !self.become_host(assembly, true, data) {
				return Err(Error::NoConnectionSpace);
			}
			self.state = State::PLANNED_PARTY;
			self.make_enrollment(false, assembly);
		}
		Ok(())
	}

	/// Whether the assembly exposes at least one output NV; turnaround
	/// enrollment is limited to such hosts.
	fn have_output_nv(&mut self, assembly: u8) -> bool {
		for offset in (0..self.app.width(assembly)).rev() {
			let mut nv_index = self.app.nv_index(assembly, offset, None);
			while let Some(nv) = nv_index {
				if self.stack.nv_config(nv).output {
					return true;
				}
				nv_index = self.app.nv_index(assembly, offset, Some(nv));
			}
		}
		false
	}

	/// Makes this device the connection host: creates the CID, picks the
	/// selectors, reserves table space and broadcasts the invitation.
	pub(crate) fn become_host(&mut self, assembly: u8, automatic: bool, data: Option<&CsmoData>) -> bool {
		// Cancel all pending enrollment UI first.
		self.update_ui_normal();

		let data = match data {
			Some(data) => *data,
			None => self.create_csmo(assembly),
		};

		let floor = (self.persist.serial % 255) as u8;
		let Some(cid) = self.connections.create_cid(&self.stack.unique_id(), floor) else {
			// No unused serial among the in-use records of this device.
			return false;
		};
		self.persist.serial = (u16::from(cid.serial) + 1) % 255;
		self.save_segment(Segment::Persistent);

		let mut csmo = Csmo::default();
		csmo.header.cid = cid;
		csmo.header.selector = Selector::new(self.get_selectors(data.width()));
		csmo.data = data;

		if !self.approve_csmo(&csmo, automatic, assembly, NO_ASSEMBLY) {
			return false;
		}

		self.group = csmo.data.group;
		self.short_timer = T_CSMO;
		// A bold state assignment is correct here: becoming a host clears
		// any lingering guest state.
		self.update_ui_and_state_enroll(State::INVITING, Event::PendingHost, assembly);

		// Turn the invitation around locally so other local assemblies may
		// join. Limited to manual connections and hosts with an output NV.
		if !automatic && self.have_output_nv(assembly) {
			self.receive_ptr_csmo(&csmo, Some(assembly), false, true);
			// The turnaround path may have stopped the timeout timer; make
			// sure the open enrollment still times out.
			self.timeout = T_ENROLL;
		}

		let code = match (automatic, self.flags.contains(Flags::EXTENDED_MESSAGES)) {
			(false, false) => Code::Csmo,
			(false, true) => Code::CsmoEx,
			(true, false) => Code::Csma,
			(true, true) => Code::CsmaEx,
		};
		self.broadcast(code, PRIMARY_DOMAIN, 3, csmo.as_bytes());
		true
	}

	/// Reserves the minimum run of free records covering the invitation's
	/// width and leaves them Pending. Answers `false` when space is
	/// insufficient; leftover Pending records of earlier invitations are
	/// reclaimed along the way.
	pub(crate) fn approve_csmo(&mut self, csmo: &Csmo, automatic: bool, host: u8, member: u8) -> bool {
		if self.state.intersects(State::GUEST_STATES) {
			return false;
		}
		if self.group_acceptable(csmo.data.group, false).is_none() {
			return false;
		}

		self.pending_connection = None;
		let mut remaining = i16::from(csmo.data.width());
		let mut record_offset = 0u8;
		let mut reserved: SmallVec<[usize; 4]> = SmallVec::new();

		for index in 0..self.connections.len() {
			let record = self.connections.get(index);
			if remaining > 0 {
				if record.state() < ConnectionState::InUse {
					if self.pending_connection.is_none() {
						self.pending_connection = Some(index);
					}
					let mut fresh = ConnectionRecord::default();
					fresh.set_offset_auto(record_offset, automatic);
					fresh.host = host;
					fresh.member = member;
					fresh.header.cid = csmo.header.cid;
					fresh.set_width((remaining.min(i16::from(WIDTH_PER_RECORD))) as u8);
					fresh.set_selector(selector::add(
						csmo.header.selector.get(),
						u16::from(record_offset) * u16::from(WIDTH_PER_RECORD),
					));
					fresh.set_state(ConnectionState::Pending);
					self.connections.set(index, &fresh);
					reserved.push(index);
					record_offset += 1;
					remaining -= i16::from(WIDTH_PER_RECORD);
				}
			} else if record.state() == ConnectionState::Pending {
				// Left over from a previous invitation.
				self.connections.clear(index);
			}
		}

		if remaining > 0 {
			// Insufficient space; a partial reservation must not survive.
			for index in reserved {
				self.connections.clear(index);
			}
			self.pending_connection = None;
			self.save_segment(Segment::ConnectionTable);
			return false;
		}

		self.save_segment(Segment::ConnectionTable);
		true
	}

	/// Re-sends the CSMO of the open enrollment, driven by the short
	/// timer.
	pub(crate) fn resend_csmo(&mut self) {
		let Some(index) = self.pending_connection else {
			return;
		};
		let record = self.connections.get(index);
		if record.offset() == 0 && record.has_local_host() {
			let mut csmo = Csmo::default();
			csmo.data = self.create_csmo(record.host);
			csmo.header = record.header;
			self.broadcast(Code::Csmo, PRIMARY_DOMAIN, 1, csmo.as_bytes());
		}
	}

	/// Receives an invitation from the network.
	pub(crate) fn receive_csmo(&mut self, automatic: bool, csmo: &Csmo) {
		self.receive_ptr_csmo(csmo, None, automatic, false);
	}

	/// The second-level invitation processor, shared with the local
	/// turnaround path.
	pub(crate) fn receive_ptr_csmo(
		&mut self,
		csmo: &Csmo,
		local_host: Option<u8>,
		automatic: bool,
		local_turnaround: bool,
	) {
		// Re-sends of an invitation we already track are quietly dropped.
		// While not engaged in an enrollment, only implemented connections
		// count: a reset mid-enrollment leaves Pending records behind, and
		// those must not suppress the next re-send.
		let min_dup_state = if self.state.intersects(State::CONNECTION_STATES) {
			ConnectionState::Pending
		} else {
			ConnectionState::InUse
		};
		if !local_turnaround
			&& self
				.connections
				.find_by_cid(&csmo.header.cid, min_dup_state)
				.is_some()
		{
			return;
		}

		// Enrollment and domain configuration share the timeout timer;
		// invitations are ignored unless the engine is idle towards the
		// acquisition side.
		if self.state.intersects(State::ACQUISITION_STATES) {
			return;
		}

		if !local_turnaround {
			let _ = self.cancel_enrollment();
		}

		if !self.approve_csmo(csmo, automatic, local_host.unwrap_or(NO_ASSEMBLY), NO_ASSEMBLY) {
			return;
		}

		self.group = csmo.data.group;
		let mut assembly = self
			.app
			.assembly(&NvCatalog(&self.stack), &csmo.data, automatic, None);
		while let Some(current) = assembly {
			// A local host inviting other local assemblies cannot invite
			// itself.
			if local_host != Some(current) {
				self.timeout = T_ENROLL;
				self.update_ui_param(Event::Pending, current);
				self.state |= State::INVITED;

				if automatic {
					// Automatic connections, once approved, get implemented
					// right away; an existing automatic enrollment is
					// extended rather than replaced.
					let extend = self.is_automatically_enrolled(current);
					self.accept_enrollment(extend, current);
					self.receive_csmc(&csmo.header.cid);
					// Approval booked space for one assembly only.
					break;
				}
			}
			assembly = self
				.app
				.assembly(&NvCatalog(&self.stack), &csmo.data, automatic, Some(current));
		}
	}

	/// Member-side acceptance: stamps the pending records, reports the
	/// approval and starts re-issuing CSME.
	pub(crate) fn accept_enrollment(&mut self, extend: bool, assembly: u8) {
		let Some(start) = self.pending_connection else {
			return;
		};
		let mut notified = false;

		for index in start..self.connections.len() {
			let mut record = self.connections.get(index);
			if record.state() != ConnectionState::Pending {
				continue;
			}
			record.set_extend(extend);
			record.member = assembly;

			if record.has_local_host() {
				// We also host this connection locally; no CSME travels.
				record.set_csme_seen(true);
				if !notified {
					self.update_ui_normal();
					self.update_ui_param(Event::ApprovedHost, record.host);
					self.update_ui_and_state_enroll(
						State::ACCEPTED | State::PLANNED_PARTY,
						Event::Approved,
						assembly,
					);
					notified = true;
				}
			} else if !notified {
				self.update_ui_normal();
				self.update_ui_and_state_enroll(State::ACCEPTED, Event::Approved, assembly);
				self.send_csme();
				notified = true;
			}
			self.connections.set(index, &record);
			self.save_segment(Segment::ConnectionTable);
		}
	}

	/// The dual-role front end behind [`Engine::create_enrollment`].
	fn make_enrollment(&mut self, extend: bool, assembly: u8) {
		let Some(index) = self.pending_connection else {
			return;
		};
		let record = self.connections.get(index);

		if self.state.contains(State::INVITED) && record.host != assembly {
			// Guest: accept, but do not implement yet.
			self.accept_enrollment(extend, assembly);
		} else if self.state.contains(State::PLANNED_PARTY) && record.host == assembly {
			self.implement_enrollment(extend, assembly);
			// Other local assemblies might still be waiting; clear it all
			// out.
			self.update_ui_and_state(State::empty(), Event::Normal, NO_ASSEMBLY);
		}
	}

	/// Receives a confirmation: the members bind now.
	pub(crate) fn receive_csmc(&mut self, cid: &Cid) {
		if self.state != State::ACCEPTED {
			// The CSMC does not apply to us; we may still be pending for a
			// different connection after missing a number of messages.
			// Treat it like a cancellation to clear the state out.
			self.receive_csmx(cid);
			return;
		}
		let Some(index) = self.pending_connection else {
			return;
		};
		let record = self.connections.get(index);
		if record.has_local_member()
			&& record.state() == ConnectionState::Pending
			&& record.cid() == cid
		{
			self.implement_enrollment(record.extend(), record.member);
		}
	}

	/// Receives an acceptance on the inviting host.
	pub(crate) fn receive_csme(&mut self, cid: &Cid) {
		if !self.state.intersects(State::INVITING) {
			return;
		}
		let Some(index) = self.pending_connection else {
			return;
		};
		let mut record = self.connections.get(index);
		// Only the first applicable record carries the csme-seen mark; the
		// implementation step relies on that.
		if !record.csme_seen() && record.has_local_host() && record.cid() == cid {
			record.set_csme_seen(true);
			self.connections.set(index, &record);
			self.save_segment(Segment::ConnectionTable);
			self.update_ui_param(Event::ApprovedHost, record.host);
			self.state.remove(State::HOST_STATES);
			self.state.insert(State::PLANNED_PARTY);
		}
	}

	/// Receives a cancellation, or a confirmation that turned out not to be
	/// ours.
	pub(crate) fn receive_csmx(&mut self, cid: &Cid) {
		if !self.state.intersects(State::CONNECTION_STATES) {
			return;
		}
		for index in 0..self.connections.len() {
			let record = self.connections.get(index);
			if record.state() == ConnectionState::Pending && record.cid() == cid {
				// Cancel for all assemblies: subject to the local status,
				// specific assemblies may not be registered in the record
				// yet.
				self.update_ui(Event::Cancelled);
				self.state.remove(State::CONNECTION_STATES);
			}
		}
	}

	/// Receives a connection deletion.
	pub(crate) fn receive_csmd(&mut self, cid: &Cid) {
		for index in 0..self.connections.len() {
			let record = self.connections.get(index);
			if record.state() >= ConnectionState::InUse && record.cid() == cid {
				self.remove_record_bindings(&record, record.member);
				self.remove_record_bindings(&record, record.host);
				self.connections.clear(index);
			}
		}
		self.save_segment(Segment::ConnectionTable);
		self.sweep_address_table();
	}

	/// Builds the CSMI advertising one connection record.
	pub(crate) fn create_csmi(&self, record: &ConnectionRecord) -> Csmi {
		let mut csmi = Csmi {
			header: record.header,
			offset_count: 0,
		};
		csmi.set_offset_count(record.offset(), record.width().wrapping_sub(1));
		csmi
	}

	pub(crate) fn send_csmi_for(&mut self, record: &ConnectionRecord) {
		let csmi = self.create_csmi(record);
		self.broadcast(Code::Csmi, PRIMARY_DOMAIN, 1, csmi.as_bytes());
	}

	/// Broadcasts the CSMR reminder for an automatic connection, clearing
	/// any pending burst mark on the record.
	pub(crate) fn send_csmr(&mut self, index: usize, record: &ConnectionRecord) {
		let mut csmo = Csmo::default();
		csmo.data = self.create_csmo(record.host);
		csmo.header = record.header;

		if record.state() > ConnectionState::InUse {
			let mut cleared = *record;
			cleared.set_state(ConnectionState::InUse);
			self.connections.set(index, &cleared);
			self.save_segment(Segment::ConnectionTable);
		}
		let code = if self.flags.contains(Flags::EXTENDED_MESSAGES) {
			Code::CsmrEx
		} else {
			Code::Csmr
		};
		self.broadcast(code, PRIMARY_DOMAIN, 1, csmo.as_bytes());
	}

	/// Broadcasts a CID-only message (CSMX/CSMC/CSME/CSMD) for a record.
	pub(crate) fn send_csm_cid(&mut self, record: &ConnectionRecord, code: Code, repeats: u8) {
		let cid = *record.cid();
		self.broadcast(code, PRIMARY_DOMAIN, repeats, cid.as_bytes());
	}

	/// Sends a CID-only message for the pending enrollment.
	fn send_csm_pending(&mut self, require_host: bool, code: Code, repeats: u8) {
		let Some(index) = self.pending_connection else {
			return;
		};
		let record = self.connections.get(index);
		if !require_host || record.has_local_host() {
			self.send_csm_cid(&record, code, repeats);
		}
	}

	pub(crate) fn send_csmx(&mut self) {
		self.send_csm_pending(true, Code::Csmx, 3);
	}

	/// Sends a CSME and schedules its periodic re-issue.
	pub(crate) fn send_csme(&mut self) {
		self.send_csm_pending(false, Code::Csme, 3);
		self.short_timer = isi_spec::T_CSME;
	}

	/// Receives connection status information and reconciles selector
	/// conflicts.
	///
	/// A foreign record whose selector range intersects ours forces us to a
	/// deterministically derived replacement range; a CSMI from our own
	/// connection's host updates our notion of its selectors.
	pub(crate) fn receive_csmi(&mut self, csmi: &Csmi) {
		for index in 0..self.connections.len() {
			let mut record = self.connections.get(index);
			if record.state() < ConnectionState::InUse {
				continue;
			}

			if record.cid() != &csmi.header.cid || record.offset() != csmi.offset() {
				let width_minus_one = u16::from(record.width().saturating_sub(1));
				for probe in 0..=u16::from(csmi.count()) {
					let candidate = selector::add(csmi.header.selector.get(), probe);
					if !selector::in_range(record.selector(), width_minus_one, candidate) {
						continue;
					}

					// This connection collides with the advertised one and
					// must move, using the fixed replacement algorithm:
					// current + width + the sum of the CID bytes.
					let mut replacement =
						selector::add(record.selector(), u16::from(record.width()));
					for byte in record.cid().as_bytes() {
						replacement = selector::add(replacement, u16::from(*byte));
					}

					self.replace_selectors(record.host, record.selector(), replacement, width_minus_one);
					self.replace_selectors(record.member, record.selector(), replacement, width_minus_one);

					// Temporarily park the record in Pending so the
					// re-applied CSMI below cannot mistake it for a
					// duplicate of itself. The pending index is preserved
					// too; this CSMI may arrive mid-enrollment.
					record.set_selector(replacement);
					record.set_state(ConnectionState::Pending);
					self.connections.set(index, &record);
					let saved_pending = self.pending_connection;
					self.pending_connection = Some(index);

					if record.has_local_host() {
						self.send_csmi_for(&record);
					}

					// Re-apply the CSMI to the new state, in case the
					// replacement range collides with yet another
					// connection.
					let echo = self.create_csmi(&record);
					self.receive_csmi(&echo);
					self.pending_connection = saved_pending;

					record.set_state(ConnectionState::InUse);
					if record.has_local_host() {
						self.conditional_diagnostics(Diagnostic::SelectorDuplicate, record.host);
					}
					if record.has_local_member() {
						self.conditional_diagnostics(Diagnostic::SelectorDuplicate, record.member);
					}
					self.connections.set(index, &record);
					break;
				}
			} else if record.selector() != csmi.header.selector.get() {
				// Same connection and offset, different selector: the host
				// moved; follow suit.
				let count = u16::from(csmi.count());
				let new = csmi.header.selector.get();
				self.replace_selectors(record.host, record.selector(), new, count);
				self.replace_selectors(record.member, record.selector(), new, count);
				record.set_selector(new);
				if record.has_local_host() {
					self.conditional_diagnostics(Diagnostic::SelectorUpdate, record.host);
				}
				if record.has_local_member() {
					self.conditional_diagnostics(Diagnostic::SelectorUpdate, record.member);
				}
				self.connections.set(index, &record);
			}
		}
		self.save_segment(Segment::ConnectionTable);
	}
}
