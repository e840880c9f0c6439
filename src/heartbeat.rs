//! NV heartbeats: periodic re-propagation of bound output NVs.
//!
//! Connections may leave a primary NV unbound while aliases to it remain
//! bound, so candidates are NVs that are bound *somehow*. The application
//! gates each candidate through its heartbeat callback.

use crate::app::Application;
use crate::stack::{AddressEntry, Destination, NvConfig, ServiceType, Stack};
use crate::{Engine, Error};

/// Heartbeats always travel with one repeat, regardless of the address
/// table, so they can participate in the broadcast scheduler scheme.
const NVHB_REPEATS: u8 = 1;

impl<S: Stack, A: Application> Engine<S, A> {
	/// Whether the NV is an output that is bound directly or through an
	/// alias.
	pub(crate) fn is_heartbeat_candidate(&self, nv_index: usize) -> bool {
		let config = self.stack.nv_config(nv_index);
		if !config.output {
			return false;
		}
		if config.is_bound() {
			return true;
		}
		(0..self.stack.alias_count())
			.any(|alias| self.stack.alias(alias).primary == nv_index as u16)
	}

	/// The heartbeat slot class: offers one candidate NV per slot to the
	/// application, round-robin.
	pub(crate) fn send_nv_heartbeat(&mut self) -> bool {
		let nv_count = self.stack.nv_count();
		if nv_count == 0 {
			return false;
		}
		for _ in 0..nv_count {
			let nv_index = self.next_heartbeat;
			self.next_heartbeat = (self.next_heartbeat + 1) % nv_count;
			if self.is_heartbeat_candidate(nv_index) && self.app.query_heartbeat(nv_index) {
				return self.issue_heartbeat(nv_index).unwrap_or(false);
			}
		}
		false
	}

	/// Propagates the NV's current value through its primary binding and
	/// every associated alias. Answers whether at least one update went
	/// out.
	pub fn issue_heartbeat(&mut self, nv_index: usize) -> Result<bool, Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		if !self.is_heartbeat_candidate(nv_index) {
			return Ok(false);
		}

		let value = self.stack.nv_value(nv_index);
		let mut had_one = false;

		let config = self.stack.nv_config(nv_index);
		if config.is_bound() {
			had_one |= self.propagate_heartbeat(&config, &value);
		}
		for alias_index in 0..self.stack.alias_count() {
			let alias = self.stack.alias(alias_index);
			if alias.primary == nv_index as u16 {
				// Associated aliases are assumed bound; unbound ones get
				// disassociated from their former primary on removal.
				had_one |= self.propagate_heartbeat(&alias.nv, &value);
			}
		}
		Ok(had_one)
	}

	fn propagate_heartbeat(&mut self, config: &NvConfig, value: &[u8]) -> bool {
		let AddressEntry::Group(mut group) = self.stack.address(usize::from(config.address_index))
		else {
			return false;
		};
		// With group addressing the receive timer stays unspecified.
		group.receive_timer = 0;
		group.retry = NVHB_REPEATS;

		let selector_high = (config.selector >> 8) as u8;
		let mut payload = [0u8; 32];
		let len = value.len().min(31);
		payload[0] = (config.selector & 0xff) as u8;
		payload[1..=len].copy_from_slice(&value[..len]);

		self.stack.send(
			ServiceType::Repeated,
			&Destination::Group(group),
			NVHB_REPEATS,
			0x80 | selector_high,
			&payload[..=len],
		);
		true
	}
}
