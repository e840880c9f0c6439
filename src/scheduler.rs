//! The periodic broadcast scheduler.
//!
//! Every 250 ms tick maintains the spreading and startup counters, drives
//! the enrollment and acquisition timers, and — when the slot wait expires —
//! picks what to broadcast by walking a round-robin over the slot classes.
//! DRUM is the fallback class and goes out at least every eighth slot.

use isi_spec::msg::{Drum, Timg};
use isi_spec::record::ConnectionState;
use isi_spec::{ChannelType, Code, T_AUTO, T_CSMR, TICKS_PER_SECOND};
use zerocopy::AsBytes;

use crate::app::{Application, Diagnostic, Event};
use crate::engine::{State, PRIMARY_DOMAIN, SECONDARY_DOMAIN};
use crate::stack::{Segment, Stack};
use crate::{Engine, Flags};

/// The non-DRUM slot classes, visited round-robin.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub(crate) enum SlotClass {
	Csmr,
	Csmi,
	NvHb,
	App,
	/// DAS only.
	Timg,
}

/// Broadcast-scheduler bookkeeping.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Periodic {
	/// Slots since the last DRUM; 0 forces DRUM.
	pub drum_pause: u8,
	pub slot: SlotClass,
	/// The connection cursor of the CSMR/CSMI classes.
	pub last_connection: usize,
}

impl Default for Periodic {
	fn default() -> Self {
		Self {
			drum_pause: 0,
			slot: SlotClass::Csmr,
			last_connection: 0,
		}
	}
}

/// Slot classes per DRUM period; DRUM goes out at least every eighth slot.
const PERIODIC_TYPES: u8 = 6;

impl<S: Stack, A: Application> Engine<S, A> {
	/// Re-throws the dice: picks a random slot among the known devices and
	/// returns the ticks to wait until then.
	pub(crate) fn alloc_slot(&mut self, devices: u8) -> u32 {
		self.rng.bounded(u32::from(devices), 0) * self.transport.ticks_per_slot
	}

	/// The full broadcast period with a jitter of one tick either way.
	///
	/// Even when spreading cannot catapult two colliding broadcasters
	/// apart, the jitter sets their packets far enough apart for the
	/// spreading detector to notice them.
	pub(crate) fn get_period(&mut self, devices: u8) -> u32 {
		u32::from(devices.max(1)) * self.transport.ticks_per_slot - 1 + self.rng.bounded(3, 0)
	}

	/// The tick handler of an ISI-S engine.
	pub(crate) fn tick_s(&mut self) {
		if !self.running {
			return;
		}
		self.common_tick(true);
		self.broadcast_scheduler(false);
	}

	/// The counters and enrollment timers shared by every engine variant.
	/// `gate_startup` pauses the startup counter while the engine is not
	/// idle, so the warm event fires only when automatic enrollment could
	/// actually be initiated.
	pub(crate) fn common_tick(&mut self, gate_startup: bool) {
		self.spreading = (self.spreading + 1).min(self.transport.spreading_interval);

		if !gate_startup || self.state.is_empty() {
			if self.startup < 0xffff {
				self.startup += 1;
			}
		}
		if self.startup == T_AUTO {
			self.update_ui_param(Event::Warm, 0);
		}

		// Timeout decrements regardless of state; the DA and DAS tick
		// handlers rely on this.
		if self.timeout > 0 {
			self.timeout -= 1;
		}

		if self.state.intersects(State::HOST_STATES) {
			if self.timeout == 1 {
				self.send_csmx();
				self.cancel_on_timeout();
			} else if self.short_timer == 1 {
				self.resend_csmo();
				self.short_timer = 1 + isi_spec::T_CSMO;
			}
		}

		if self.state.contains(State::ACCEPTED) {
			if self.short_timer == 1 {
				self.send_csme();
			}
			self.cancel_on_timeout();
		} else if self.state.contains(State::INVITED) {
			self.cancel_on_timeout();
		}

		if self.short_timer > 0 {
			self.short_timer -= 1;
		}

		// The early DRUM, scheduled at initialization.
		if self.special_drum > 0 {
			self.special_drum -= 1;
			if self.special_drum == 0 {
				self.send_drum();
			}
		}
	}

	fn cancel_on_timeout(&mut self) {
		if self.timeout == 1 {
			self.update_ui(Event::Cancelled);
			self.short_timer = 0;
			self.state = State::empty();
		}
	}

	fn advance_cursor(&mut self) -> bool {
		self.periodic.last_connection += 1;
		if self.periodic.last_connection >= self.connections.len() {
			self.periodic.last_connection = 0;
			true
		} else {
			false
		}
	}

	/// Chooses and emits this slot's broadcast once the wait expires.
	pub(crate) fn broadcast_scheduler(&mut self, das: bool) {
		if self.wait > 0 {
			self.wait -= 1;
			return;
		}

		if das {
			self.decrement_live_counters();
		}

		// Traffic was observed nearby a moment ago: give way by
		// re-allocating the slot. Otherwise keep the slot and wait out the
		// full period.
		let crowded = self.spreading < self.transport.spreading_interval;
		self.wait = if crowded {
			self.alloc_slot(self.persist.devices)
		} else {
			self.get_period(self.persist.devices)
		};
		if crowded {
			self.conditional_diagnostics(Diagnostic::ReallocateSlot, 0);
		}

		// Find the next connection record the CSMR/CSMI classes could
		// serve; a full wrap means there is none, and the slot goes to the
		// connectionless classes.
		let mut record = self.connections.get(self.periodic.last_connection);
		while record.state() < ConnectionState::InUse {
			if self.advance_cursor() {
				self.periodic.slot = SlotClass::NvHb;
				break;
			}
			record = self.connections.get(self.periodic.last_connection);
		}

		let mut sent: Option<Code> = None;
		let mut consumed = false;
		let force_drum = self.periodic.drum_pause == 0;
		self.periodic.drum_pause += 1;

		if !force_drum {
			if self.periodic.slot == SlotClass::Csmr {
				self.periodic.slot = SlotClass::Csmi;
				if record.is_automatic_head() && record.has_local_host() && self.startup > T_CSMR {
					// The cursor stays put: this entry is revisited once
					// more for CSMI.
					self.send_csmr(self.periodic.last_connection, &record);
					sent = Some(Code::Csmr);
				}
			}

			if sent.is_none() && self.periodic.slot == SlotClass::Csmi {
				// Advance in any case, and never start the next cycle with
				// CSMI, so other classes are not choked out.
				self.advance_cursor();
				self.periodic.slot = SlotClass::NvHb;
				if record.has_local_host() {
					self.send_csmi_for(&record);
					sent = Some(Code::Csmi);
				}
			}

			if sent.is_none() && self.periodic.slot == SlotClass::NvHb {
				self.periodic.slot = SlotClass::App;
				if self.send_nv_heartbeat() {
					consumed = true;
				}
			}

			if sent.is_none() && !consumed && self.periodic.slot == SlotClass::App {
				self.periodic.slot = if das { SlotClass::Timg } else { SlotClass::Csmr };
				if self.flags.contains(Flags::APPLICATION_PERIODIC) && self.app.create_periodic_msg()
				{
					consumed = true;
				}
			}

			if das && sent.is_none() && !consumed && self.periodic.slot == SlotClass::Timg {
				self.periodic.slot = SlotClass::Csmr;
				let estimate = self.announced_estimate();
				self.send_timg(estimate);
				// A plain DAS has no connections and alternates TIMG and
				// DRUM.
				self.periodic.drum_pause = 0;
				sent = Some(Code::Timg);
			}
		}

		if sent.is_none() && !consumed {
			self.send_drum();
			self.periodic.drum_pause = 1;
			sent = Some(Code::Drum);
		}

		if let Some(code) = sent {
			self.conditional_diagnostics(Diagnostic::SendPeriodic, code.into());
		}
		if self.periodic.drum_pause >= PERIODIC_TYPES {
			self.periodic.drum_pause = 0;
		}
	}

	/// Broadcasts a DRUM reporting the device's actual primary-domain
	/// address.
	pub fn send_drum(&mut self) {
		let domain = self.stack.domain(usize::from(PRIMARY_DOMAIN));
		let program_id = self.stack.program_id();

		let mut drum = Drum::default();
		drum.set_did_length(usize::from(domain.len & 0x07));
		drum.domain_id = domain.id;
		drum.subnet = domain.subnet;
		drum.node = domain.node;
		drum.unique_id = self.stack.unique_id();
		drum.nuid = self.persist.nuid;
		drum.channel_type = self.channel_type.into();
		drum.extended.device_class = [program_id[3], program_id[4]];
		drum.extended.usage = program_id[5];

		let code = if self.flags.contains(Flags::EXTENDED_MESSAGES) {
			Code::DrumEx
		} else {
			Code::Drum
		};
		self.broadcast(code, SECONDARY_DOMAIN, 1, drum.as_bytes());
	}

	/// Broadcasts timing guidance (DAS only).
	pub(crate) fn send_timg(&mut self, device_count: u8) {
		let timg = Timg {
			device_count,
			channel_type: self.channel_type.into(),
		};
		self.broadcast(Code::Timg, PRIMARY_DOMAIN, 1, timg.as_bytes());
	}

	/// Receives a DRUM: detects and resolves subnet/node collisions on the
	/// local domain.
	pub(crate) fn receive_drum_s(&mut self, drum: &Drum) {
		if drum.unique_id == self.stack.unique_id() {
			return;
		}

		let domain = self.stack.domain(usize::from(PRIMARY_DOMAIN));
		let len = usize::from(domain.len & 0x07);
		if drum.did_length() != len || drum.domain_id[..len] != domain.id[..len] {
			return;
		}
		self.conditional_diagnostics(Diagnostic::ReceiveDrum, 0);

		if drum.subnet == domain.subnet && drum.node == domain.node && !self.derived_address {
			// Collision: someone else uses our address. Move away and
			// announce the new address right away.
			debug!("subnet/node collision, re-allocating");
			let subnet = self.alloc_subnet();
			let node = self.alloc_node();
			let id = domain.id;
			if self.set_domain(PRIMARY_DOMAIN, &id[..len], subnet, node) {
				self.conditional_diagnostics(Diagnostic::SubnetNodeDuplicate, PRIMARY_DOMAIN);
				self.send_drum();
			}
		}
	}

	/// Processes timing guidance, whether from a TIMG message or from the
	/// timing fields of a DIDRM.
	pub(crate) fn receive_timg(&mut self, device_estimate: u8, channel_type: u8) {
		if self.persist.devices != device_estimate {
			// A different estimate arrived: adopt it and throw the dice
			// again.
			self.set_device_count_estimate(device_estimate);
			self.wait = self.alloc_slot(device_estimate);
		}
		self.conditional_diagnostics(Diagnostic::ReceiveTimg, device_estimate);

		if let Ok(channel) = ChannelType::try_from(channel_type) {
			self.select_transport(channel);
		}
	}

	pub(crate) fn set_device_count_estimate(&mut self, devices: u8) {
		self.persist.devices = devices;
		if self.running {
			self.save_segment(Segment::Persistent);
		}
	}

	/// Maintains the CSMR burst timer armed by a DIDCF; on expiry, sends
	/// every CSMR still marked for it.
	pub(crate) fn tcsmr_tick(&mut self) {
		if self.tcsmr == 0 {
			return;
		}
		self.tcsmr -= 1;
		if self.tcsmr > 0 {
			return;
		}
		for index in 0..self.connections.len() {
			let record = self.connections.get(index);
			if record.state() == ConnectionState::TcsmrPending {
				self.send_csmr(index, &record);
			}
		}
	}

	/// Arms the CSMR burst: a minimum hesitation lets the newly registered
	/// device finish its own configuration, then the burst spreads over up
	/// to a quarter of the device count, in seconds.
	pub(crate) fn arm_tcsmr(&mut self) {
		self.tcsmr = TICKS_PER_SECOND
			* self
				.rng
				.bounded(u32::from(self.persist.devices) / 4, isi_spec::T_CSMR_PAUSE);
	}
}
