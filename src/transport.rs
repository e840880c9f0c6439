//! Per-channel transport timing profiles.
//!
//! Each channel type maps to a fixed set of link timers, the channel's
//! subnet bucket and the broadcast slot geometry. Selecting a new profile
//! rewrites the timers of every group address-table entry and the node's
//! non-group receive timer.

use isi_spec::{ChannelType, TICKS_PER_SECOND};

use crate::app::Application;
use crate::stack::{AddressEntry, Stack};
use crate::Engine;

/// Subnets are allocated from 64-value buckets anchored per channel class.
pub(crate) const SUBNET_BUCKET_SIZE: u32 = 64;
const SUBNET_START_TPFT: u32 = 64;
const SUBNET_START_PL20: u32 = 128;

/// One row of the transport profile table. Timer values are link-layer
/// timer-code encodings, not milliseconds.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Transport {
	/// Encoded repeat timer, pre-shifted into its address-table position.
	pub repeat_timer: u8,
	/// Encoded transmit timer.
	pub transmit_timer: u8,
	/// Encoded group receive timer.
	pub group_receive_timer: u8,
	/// Encoded non-group receive timer.
	pub non_group_timer: u8,
	/// Base subnet of the channel's 64-value bucket.
	pub base_subnet: u32,
	/// Width of an ISI broadcast slot in ticks.
	pub ticks_per_slot: u32,
	/// Width of the spreading interval in ticks. At least twice the
	/// broadcast jitter of one tick.
	pub spreading_interval: u32,
}

/// TP/FT and the IP channels: repeat timer 16 ms, tx timer 48 ms, group and
/// non-group receive timers 128 ms. Slot width assumes 1.5% of a 180 pkt/s
/// channel.
const TP_FT: Transport = Transport {
	repeat_timer: 0 << 4,
	transmit_timer: 3,
	group_receive_timer: 0,
	non_group_timer: 0,
	base_subnet: SUBNET_START_TPFT,
	ticks_per_slot: 5 * TICKS_PER_SECOND,
	spreading_interval: TICKS_PER_SECOND,
};

/// Power line: repeat timer 16 ms, tx timer 192 ms, group receive timer
/// 3072 ms, non-group 768 ms. Slot width assumes 1.5% of a 14 pkt/s channel.
const PL_20: Transport = Transport {
	repeat_timer: 0 << 4,
	transmit_timer: 7,
	group_receive_timer: 9,
	non_group_timer: 5,
	base_subnet: SUBNET_START_PL20,
	ticks_per_slot: 10 * TICKS_PER_SECOND,
	spreading_interval: 3 * TICKS_PER_SECOND / 2,
};

pub(crate) fn profile(channel: ChannelType) -> &'static Transport {
	match channel {
		ChannelType::Ip852 | ChannelType::IzotIp | ChannelType::TpFt => &TP_FT,
		ChannelType::Pl20A | ChannelType::Pl20C | ChannelType::Pl20N => &PL_20,
	}
}

impl<S: Stack, A: Application> Engine<S, A> {
	/// Switches to the profile for `channel` and propagates the timer set
	/// into every group address-table entry and the configuration data.
	pub(crate) fn select_transport(&mut self, channel: ChannelType) {
		let profile = profile(channel);
		if self.transport != *profile {
			debug!("transport profile changes to {channel:?}");
			self.transport = *profile;

			for index in 0..self.stack.address_count() {
				if let AddressEntry::Group(mut group) = self.stack.address(index) {
					group.receive_timer = self.transport.group_receive_timer;
					group.repeat_timer = self.transport.repeat_timer >> 4;
					group.transmit_timer = self.transport.transmit_timer;
					self.stack.update_address(index, &AddressEntry::Group(group));
				}
			}
		}

		// The non-group receive timer is checked unconditionally so that it
		// is correct at power-up as well.
		if self.stack.non_group_receive_timer() != self.transport.non_group_timer {
			self.stack
				.set_non_group_receive_timer(self.transport.non_group_timer);
		}
	}
}
