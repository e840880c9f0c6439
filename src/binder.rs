//! Reconciling the NV, alias and address tables with the connection table.
//!
//! Implementing an enrollment resolves the group address-table entry, then
//! programs every NV the affected assemblies expose under the connection's
//! selectors; extensions go through alias-table rows instead of touching
//! the primary binding. Removal is the mirror image, followed by an address
//! sweep that frees entries nothing references anymore.

use isi_spec::record::{ConnectionRecord, ConnectionState};
use isi_spec::{Code, NO_ASSEMBLY, SELECTOR_SPAN};

use crate::app::{Application, Event};
use crate::engine::State;
use crate::selector;
use crate::stack::{AddressEntry, AliasConfig, GroupAddress, Segment, ServiceType, Stack, ALIAS_UNUSED, NO_ADDRESS, UNBOUND_SELECTOR_BASE};
use crate::{Engine, Error};

impl<S: Stack, A: Application> Engine<S, A> {
	/// Whether `group` can be joined: answers the address-table index of an
	/// existing membership or of a free entry, or `None` when the table is
	/// full. With `join`, the free entry is claimed and programmed.
	pub(crate) fn group_acceptable(&mut self, group: u8, join: bool) -> Option<usize> {
		let mut first_empty = None;

		// Back to front, so the scan ends on a matching group entry or the
		// first empty one.
		for index in (0..self.stack.address_count()).rev() {
			match self.stack.address(index) {
				AddressEntry::Group(entry) if entry.group == group => return Some(index),
				AddressEntry::Unbound => first_empty = Some(index),
				_ => {}
			}
		}

		let index = first_empty?;
		if join {
			let entry = GroupAddress {
				group,
				size: 0,
				member: 0,
				domain: 0,
				repeat_timer: self.transport.repeat_timer >> 4,
				retry: self.persist.repeat_count,
				transmit_timer: self.transport.transmit_timer,
				receive_timer: self.transport.group_receive_timer,
			};
			self.stack.update_address(index, &AddressEntry::Group(entry));
		}
		Some(index)
	}

	/// Picks a random selector range of `width` consecutive values none of
	/// which is used by any NV or alias.
	pub(crate) fn get_selectors(&mut self, width: u8) -> u16 {
		'restart: loop {
			let start = (u16::from(self.rng.byte() & 0x2f) << 8) | u16::from(self.rng.byte());
			let mut candidate = start;
			for _ in 0..width.max(1) {
				for index in 0..self.stack.nv_count() {
					if self.stack.nv_config(index).selector == candidate {
						continue 'restart;
					}
				}
				// Unused alias entries park an all-ones selector that can
				// never match.
				for index in 0..self.stack.alias_count() {
					if self.stack.alias(index).nv.selector == candidate {
						continue 'restart;
					}
				}
				candidate = selector::increment(candidate);
			}
			return start;
		}
	}

	/// Programs one assembly's NVs at the given selector offset.
	///
	/// Without `extend`, or when the primary NV is unbound, the primary is
	/// programmed directly and any alias previously tied to it is freed.
	/// Otherwise a free alias row carries the additional binding.
	fn bind_assembly(
		&mut self,
		assembly: u8,
		offset: u8,
		extend: bool,
		address_index: u16,
		selector: u16,
		consider_turnaround: bool,
	) {
		if assembly == NO_ASSEMBLY {
			return;
		}

		let mut any_bound = false;
		let mut nv_index = self.app.nv_index(assembly, offset, None);
		while let Some(nv) = nv_index {
			let mut config = self.stack.nv_config(nv);
			let turnaround = consider_turnaround && config.output;
			let mut bound = false;

			if !extend || !config.is_bound() {
				debug!("binding assembly {assembly}: NV {nv} selector {selector:#06x}");
				config.address_index = address_index;
				config.selector = selector;
				config.turnaround = turnaround;
				config.service = ServiceType::Repeated;
				self.stack.update_nv_config(nv, &config);
				bound = true;
			}

			for alias_index in 0..self.stack.alias_count() {
				let mut alias = self.stack.alias(alias_index);
				if !extend && bound && alias.primary == nv as u16 {
					// The binding was replaced; drop the stale alias.
					self.stack.update_alias(alias_index, &AliasConfig::UNUSED);
				} else if !bound && alias.primary == ALIAS_UNUSED {
					alias.primary = nv as u16;
					alias.nv = self.stack.nv_config(nv);
					alias.nv.address_index = address_index;
					alias.nv.selector = selector;
					alias.nv.turnaround = turnaround;
					alias.nv.service = ServiceType::Repeated;
					self.stack.update_alias(alias_index, &alias);
					bound = true;
				}
			}

			any_bound |= bound;
			nv_index = self.app.nv_index(assembly, offset, Some(nv));
		}

		if any_bound {
			self.update_ui_param(Event::Implemented, assembly);
		}
	}

	/// Implements the pending enrollment for `assembly`: joins the group,
	/// programs the tables, marks the records in use, and — on a host —
	/// claims the selectors with an immediate CSMI to shorten the window
	/// for selector leaks.
	pub(crate) fn implement_enrollment(&mut self, extend: bool, assembly: u8) {
		let mut csmc_index = None;

		if !extend {
			// A replacing connection undoes the one it replaces; only InUse
			// records qualify, which preserves the Pending records of the
			// replacement.
			self.remove_matching_connections(self.state, assembly, false);
		}

		let address_index = self
			.group_acceptable(self.group, true)
			.map_or(NO_ADDRESS, |index| index as u16);

		let start = match self.pending_connection {
			Some(index) => index,
			None => return,
		};

		let mut offset = 0u8;
		for index in start..self.connections.len() {
			let mut record = self.connections.get(index);
			if !record.involves(assembly) || record.state() != ConnectionState::Pending {
				continue;
			}

			// The host sends one CSMC for the first applicable record; the
			// csme-seen mark only ever exists on the first one.
			if record.csme_seen() && csmc_index.is_none() {
				csmc_index = Some(index);
				self.send_csm_cid(&record, Code::Csmc, 3);
			}

			let turnaround = record.has_local_host() && record.has_local_member();
			let mut selector = record.selector();
			for _ in 0..record.width() {
				self.bind_assembly(record.host, offset, extend, address_index, selector, turnaround);
				self.bind_assembly(record.member, offset, extend, address_index, selector, turnaround);
				selector = selector::increment(selector);
				offset += 1;
			}

			record.set_state(ConnectionState::InUse);
			self.connections.set(index, &record);

			if record.has_local_host() {
				self.send_csmi_for(&record);
			}
		}

		// Re-send the CSMC once more for good measure, hoping to reach
		// every guest.
		if let Some(index) = csmc_index {
			let record = self.connections.get(index);
			self.send_csm_cid(&record, Code::Csmc, 3);
		}

		self.state = State::empty();
		self.save_segment(Segment::ConnectionTable);
	}

	/// Replaces selectors `[old, old + count]` with `[new, new + count]`
	/// throughout the assembly's NV and alias bindings. The caller updates
	/// the connection table.
	pub(crate) fn replace_selectors(&mut self, assembly: u8, old: u16, new: u16, count: u16) {
		if assembly == NO_ASSEMBLY {
			return;
		}
		for offset in (0..=count).rev() {
			let mut nv_index = self.app.nv_index(assembly, offset as u8, None);
			while let Some(nv) = nv_index {
				let mut config = self.stack.nv_config(nv);
				if config.is_bound() && selector::in_range(old, count, config.selector) {
					let distance = (config.selector + SELECTOR_SPAN - old) % SELECTOR_SPAN;
					config.selector = selector::add(new, distance);
					self.stack.update_nv_config(nv, &config);
				}

				for alias_index in 0..self.stack.alias_count() {
					let mut alias = self.stack.alias(alias_index);
					if alias.primary == nv as u16
						&& alias.nv.is_bound()
						&& selector::in_range(old, count, alias.nv.selector)
					{
						let distance = (alias.nv.selector + SELECTOR_SPAN - old) % SELECTOR_SPAN;
						alias.nv.selector = selector::add(new, distance);
						self.stack.update_alias(alias_index, &alias);
					}
				}

				nv_index = self.app.nv_index(assembly, offset as u8, Some(nv));
			}
		}
	}

	/// Frees every occupied address-table entry no NV or alias refers to.
	pub(crate) fn sweep_address_table(&mut self) {
		for address_index in 0..self.stack.address_count() {
			if self.stack.address(address_index).is_unbound() {
				continue;
			}

			let mut users = 0;
			for nv in 0..self.stack.nv_count() {
				let config = self.stack.nv_config(nv);
				if config.is_bound() && usize::from(config.address_index) == address_index {
					users += 1;
					break;
				}
			}
			if users == 0 {
				for alias_index in 0..self.stack.alias_count() {
					let alias = self.stack.alias(alias_index);
					if alias.is_used() && usize::from(alias.nv.address_index) == address_index {
						users += 1;
						break;
					}
				}
			}

			if users == 0 {
				self.stack.update_address(address_index, &AddressEntry::Unbound);
			}
		}
	}

	/// Unbinds everything the record governs for `assembly`.
	pub(crate) fn remove_record_bindings(&mut self, record: &ConnectionRecord, assembly: u8) {
		if assembly == NO_ASSEMBLY {
			return;
		}

		let base_offset = record.offset() * isi_spec::WIDTH_PER_RECORD;
		let width_minus_one = u16::from(record.width().saturating_sub(1));
		let start = record.selector();

		for offset in (0..=width_minus_one).rev() {
			let nv_offset = base_offset + offset as u8;
			let mut nv_index = self.app.nv_index(assembly, nv_offset, None);
			while let Some(nv) = nv_index {
				let mut config = self.stack.nv_config(nv);
				if selector::in_range(start, width_minus_one, config.selector) {
					config.address_index = NO_ADDRESS;
					config.selector = UNBOUND_SELECTOR_BASE - nv as u16;
					config.turnaround = false;
					config.service = ServiceType::Repeated;
					self.stack.update_nv_config(nv, &config);
				}

				for alias_index in 0..self.stack.alias_count() {
					let alias = self.stack.alias(alias_index);
					if alias.primary == nv as u16
						&& selector::in_range(start, width_minus_one, alias.nv.selector)
					{
						self.stack.update_alias(alias_index, &AliasConfig::UNUSED);
					}
				}

				nv_index = self.app.nv_index(assembly, nv_offset, Some(nv));
			}
		}

		self.update_ui_param(Event::Deleted, assembly);
	}

	/// Removes every implemented connection involving `assembly`. On the
	/// host (or with `global`), the whole connection goes, announced by
	/// CSMD for the offset-0 record; a plain member only detaches itself.
	pub(crate) fn remove_matching_connections(
		&mut self,
		required_state: State,
		assembly: u8,
		global: bool,
	) {
		if self.state != required_state {
			return;
		}

		for index in 0..self.connections.len() {
			let mut record = self.connections.get(index);
			if !record.involves(assembly) || record.state() < ConnectionState::InUse {
				continue;
			}
			debug!("removing connection {index} for assembly {assembly}");

			// The member goes in any case: either it is the requested
			// assembly, or the whole connection (host included) goes.
			self.remove_record_bindings(&record, record.member);

			if global || record.host == assembly {
				// Only the offset-0 record is announced; the CSMD goes out
				// once more after local removal to improve its chances, as
				// the engine cannot re-send it later.
				if record.offset() == 0 {
					self.send_csm_cid(&record, Code::Csmd, 3);
				}
				self.remove_record_bindings(&record, record.host);
				if record.offset() == 0 {
					self.send_csm_cid(&record, Code::Csmd, 3);
				}
				self.connections.clear(index);
			} else {
				record.member = NO_ASSEMBLY;
				self.connections.set(index, &record);
			}
		}

		self.save_segment(Segment::ConnectionTable);
		self.sweep_address_table();
	}

	/// Removes the assembly's connections network-wide.
	pub fn delete_enrollment(&mut self, assembly: u8) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		self.remove_matching_connections(State::empty(), assembly, true);
		Ok(())
	}

	/// Detaches the assembly locally, leaving the remaining connection
	/// intact.
	pub fn leave_enrollment(&mut self, assembly: u8) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		self.remove_matching_connections(State::empty(), assembly, false);
		Ok(())
	}
}
