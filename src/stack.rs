//! The link-stack collaborator interface.
//!
//! The engine programs the stack's NV, alias, address and domain tables and
//! sends its messages through the stack; it never touches the medium itself.
//! The host wires a real LonTalk stack to [`Stack`]; the integration tests
//! use an in-memory implementation.
//!
//! All table accessors copy records by value. Records are small and the
//! engine follows a read-modify-write discipline throughout.

use alloc::vec::Vec;

use isi_spec::UniqueId;

/// LonTalk message codes the engine exchanges beside its own application
/// code.
pub(crate) mod lontalk {
	pub const SERVICE_PIN_MESSAGE: u8 = 0x7f;
	pub const WINK_MESSAGE: u8 = 0x70;
	pub const QUERY_DOMAIN_MESSAGE: u8 = 0x6a;
	pub const QUERY_DOMAIN_SUCCESS: u8 = 0x2a;
	pub const QUERY_DOMAIN_FAILURE: u8 = 0x0a;
	pub const UPDATE_DOMAIN_MESSAGE: u8 = 0x63;
	pub const UPDATE_DOMAIN_SUCCESS: u8 = 0x23;
	pub const UPDATE_DOMAIN_FAILURE: u8 = 0x03;
}

/// Sentinel address-table index stored in unbound NV entries.
pub const NO_ADDRESS: u16 = 0xffff;

/// Sentinel primary index marking an unused alias entry.
pub const ALIAS_UNUSED: u16 = 0xffff;

/// Unbound NVs park their selector at `0x3fff - nv_index`.
pub const UNBOUND_SELECTOR_BASE: u16 = 0x3fff;

/// LonTalk delivery services.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ServiceType {
	Acked,
	/// Unacknowledged-repeated; all periodic ISI traffic uses this.
	Repeated,
	Unacked,
	/// Request/response.
	Request,
}

/// Outbound destinations the engine uses.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Destination {
	/// Domain-wide broadcast on the given domain table index.
	Broadcast { domain: u8 },
	/// Unique-id ("neuron id") addressed unicast on the given domain index.
	UniqueId { domain: u8, unique_id: UniqueId },
	/// Implicit addressing through a group address-table entry.
	Group(GroupAddress),
}

/// A group address-table entry.
#[derive(Default, PartialEq, Eq, Clone, Copy, Debug)]
pub struct GroupAddress {
	pub group: u8,
	/// Group size; 0 denotes a huge group.
	pub size: u8,
	pub member: u8,
	/// Domain table index.
	pub domain: u8,
	/// Encoded repeat timer, pre-shifted into its table position.
	pub repeat_timer: u8,
	/// Retry / repeat count.
	pub retry: u8,
	/// Encoded transmit timer.
	pub transmit_timer: u8,
	/// Encoded group receive timer.
	pub receive_timer: u8,
}

/// One address-table entry as the engine sees it.
///
/// The engine allocates and frees group entries; anything else a network
/// tool may have written is opaque to it but counts as occupied.
#[derive(Default, PartialEq, Eq, Clone, Copy, Debug)]
pub enum AddressEntry {
	#[default]
	Unbound,
	Group(GroupAddress),
	/// A non-group entry owned by someone else.
	Other,
}

impl AddressEntry {
	pub fn is_unbound(&self) -> bool {
		matches!(self, AddressEntry::Unbound)
	}

	pub fn group(&self) -> Option<&GroupAddress> {
		match self {
			AddressEntry::Group(group) => Some(group),
			_ => None,
		}
	}
}

/// One NV configuration table entry.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct NvConfig {
	/// 14-bit selector when bound; `0x3fff - nv_index` when unbound.
	pub selector: u16,
	/// Address table index, or [`NO_ADDRESS`].
	pub address_index: u16,
	/// Direction; `true` for an output NV.
	pub output: bool,
	pub turnaround: bool,
	pub service: ServiceType,
}

impl NvConfig {
	/// The unbound image of the NV with the given index.
	pub fn unbound(nv_index: usize) -> Self {
		NvConfig {
			selector: UNBOUND_SELECTOR_BASE - nv_index as u16,
			address_index: NO_ADDRESS,
			output: false,
			turnaround: false,
			service: ServiceType::Repeated,
		}
	}

	/// A selector high byte above 0x2f denotes an unbound entry.
	pub fn is_bound(&self) -> bool {
		self.selector <= isi_spec::SELECTOR_MASK
	}
}

/// One alias table entry: a secondary binding linked to a primary NV.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct AliasConfig {
	pub nv: NvConfig,
	/// NV index of the primary, or [`ALIAS_UNUSED`].
	pub primary: u16,
}

impl AliasConfig {
	pub const UNUSED: AliasConfig = AliasConfig {
		nv: NvConfig {
			selector: UNBOUND_SELECTOR_BASE,
			address_index: NO_ADDRESS,
			output: false,
			turnaround: false,
			service: ServiceType::Repeated,
		},
		primary: ALIAS_UNUSED,
	};

	pub fn is_used(&self) -> bool {
		self.primary != ALIAS_UNUSED
	}
}

/// One domain table entry.
#[derive(Default, PartialEq, Eq, Clone, Copy, Debug)]
pub struct DomainConfig {
	pub id: [u8; isi_spec::DOMAIN_ID_LEN],
	/// Id length 0..=6.
	pub len: u8,
	pub subnet: u8,
	pub node: u8,
	pub key: [u8; isi_spec::DOMAIN_ID_LEN],
}

/// Persistence segments the engine owns, stored apart from the stack's own
/// network image.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Segment {
	/// Device count, nuid, CID serial, boot type, repeat count.
	Persistent,
	/// The raw connection record array.
	ConnectionTable,
}

/// Opaque token correlating a request with its response.
pub type Correlator = u32;

/// The services the engine requires from the LonTalk stack.
pub trait Stack {
	/// The device's unique id.
	fn unique_id(&self) -> UniqueId;

	/// The 8-byte program id. Byte 6 carries the standard channel type.
	fn program_id(&self) -> [u8; 8];

	/// Seeds the engine's random primitive.
	fn seed(&mut self) -> [u8; 32];

	fn nv_count(&self) -> usize;
	fn nv_config(&self, index: usize) -> NvConfig;
	fn update_nv_config(&mut self, index: usize, nv: &NvConfig);
	/// The NV's declared type, 0 if unknown.
	fn nv_type(&self, index: usize) -> u8;
	/// The NV's current value, for heartbeats.
	fn nv_value(&self, index: usize) -> Vec<u8>;

	fn alias_count(&self) -> usize;
	fn alias(&self, index: usize) -> AliasConfig;
	fn update_alias(&mut self, index: usize, alias: &AliasConfig);

	fn address_count(&self) -> usize;
	fn address(&self, index: usize) -> AddressEntry;
	fn update_address(&mut self, index: usize, entry: &AddressEntry);

	fn domain(&self, index: usize) -> DomainConfig;
	/// Programs a domain table entry. `clone` requests a clone-domain
	/// configuration (used for the secondary, acquisition, domain).
	fn update_domain(&mut self, index: usize, domain: &DomainConfig, clone: bool);

	/// The encoded non-group receive timer from the configuration data.
	fn non_group_receive_timer(&self) -> u8;
	fn set_non_group_receive_timer(&mut self, timer: u8);

	/// Sends one message. `repeats` is the repeat/retry count for the
	/// chosen service.
	fn send(
		&mut self,
		service: ServiceType,
		destination: &Destination,
		repeats: u8,
		code: u8,
		payload: &[u8],
	);

	/// Answers a request identified by `correlator`.
	fn send_response(&mut self, correlator: Correlator, code: u8, payload: &[u8]);

	/// Broadcasts the standard service-pin message.
	fn send_service_pin(&mut self);

	/// Brings the node into the configured, online state.
	fn go_configured_online(&mut self);

	/// Schedules a node reset.
	fn reset(&mut self);

	fn read_segment(&mut self, segment: Segment) -> Option<Vec<u8>>;
	fn write_segment(&mut self, segment: Segment, image: &[u8]);
}
