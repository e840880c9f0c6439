//! The application collaborator interface.
//!
//! Every overridable operation is a trait method with a default, so an
//! application implements only what it needs. Defaults model the simplest
//! device: one NV per assembly, no automatic acceptance, no heartbeats.

use isi_spec::msg::{CsmoData, Direction};

use crate::stack::Stack;

/// Read-only view of the NV catalog, handed to application callbacks so
/// their default implementations can reason about local NVs.
pub trait NvDirectory {
	fn nv_count(&self) -> usize;
	/// The NV's declared type, 0 if unknown.
	fn nv_type(&self, index: usize) -> u8;
	fn is_output(&self, index: usize) -> bool;
}

pub(crate) struct NvCatalog<'a, S: Stack>(pub(crate) &'a S);

impl<S: Stack> NvDirectory for NvCatalog<'_, S> {
	fn nv_count(&self) -> usize {
		self.0.nv_count()
	}

	fn nv_type(&self, index: usize) -> u8 {
		self.0.nv_type(index)
	}

	fn is_output(&self, index: usize) -> bool {
		self.0.nv_config(index).output
	}
}

/// Finds the first local NV compatible with the invitation, starting at
/// assembly `from`. Models the simple device whose assembly numbers equal
/// their NV indices.
pub fn find_local_nv_of_type(nvs: &dyn NvDirectory, csmo: &CsmoData, from: u8) -> Option<u8> {
	let direction = csmo.direction();
	for assembly in usize::from(from)..nvs.nv_count() {
		if csmo.nv_type != nvs.nv_type(assembly) {
			continue;
		}
		if direction == Direction::Any {
			return Some(assembly as u8);
		}
		// The direction value names the remote side, so complementary NVs
		// match: an Input invitation wants our outputs.
		if direction != Direction::Various && (direction == Direction::Input) == nvs.is_output(assembly)
		{
			return Some(assembly as u8);
		}
	}
	None
}

/// User-interface transitions reported by the engine.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Event {
	/// The engine returned to its idle state.
	Normal,
	/// An invitation was received; the assembly awaits a decision.
	Pending,
	/// The local assembly accepted an invitation.
	Approved,
	/// An enrollment was opened with the local assembly as host.
	PendingHost,
	/// At least one member accepted the locally hosted enrollment.
	ApprovedHost,
	/// A connection was implemented for the assembly.
	Implemented,
	/// The pending enrollment was cancelled.
	Cancelled,
	/// The assembly's connection was deleted.
	Deleted,
	/// The warmup phase completed; automatic enrollment may start.
	Warm,
	/// The device that answered an acquisition request should wink now.
	Wink,
	/// Domain or device acquisition completed successfully.
	Registered,
	/// An acquisition procedure failed; the parameter carries an
	/// [`AbortReason`].
	Aborted,
	/// An acquisition retry started; the parameter carries the retries left.
	Retry,
}

/// Why an acquisition procedure was aborted.
#[derive(num_enum::IntoPrimitive, num_enum::TryFromPrimitive, PartialEq, Eq, Clone, Copy, Debug)]
#[repr(u8)]
pub enum AbortReason {
	/// All retries were used up without a usable response.
	Unsuccessful = 0,
	/// DIDRM responses arrived from servers on different domains.
	MismatchingDidrm = 1,
	/// A DIDCF arrived that does not match the collected DIDRM.
	MismatchingDidcf = 2,
	/// A second service-pin message arrived from a different device.
	MismatchService = 3,
}

/// Optional observability events.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Diagnostic {
	/// The broadcast slot was re-allocated due to nearby traffic.
	ReallocateSlot,
	/// A periodic message was sent; the parameter carries the message code.
	SendPeriodic,
	/// A DRUM for the local domain was received.
	ReceiveDrum,
	/// Timing guidance was received; the parameter carries the estimate.
	ReceiveTimg,
	/// The local subnet/node collided and was re-allocated.
	SubnetNodeDuplicate,
	/// A subnet/node address was allocated for a domain index.
	SubnetNodeAllocation,
	/// A selector conflict was detected and resolved for the assembly.
	SelectorDuplicate,
	/// A selector update from the connection host was followed.
	SelectorUpdate,
}

/// The callbacks the engine consumes from the application.
pub trait Application {
	/// Tailors the invitation for a locally hosted enrollment. The engine
	/// pre-fills `csmo` with defaults (primary group, application id from
	/// the program id, any direction, the assembly's width and NV type);
	/// the application adjusts what it needs.
	fn create_csmo(&mut self, assembly: u8, csmo: &mut CsmoData) {
		let _ = (assembly, csmo);
	}

	/// Maps an incoming invitation to a local assembly. Called iteratively
	/// with the previously returned assembly until it answers `None`.
	///
	/// The default accepts a simple manual connection with a known NV type
	/// when a compatible local NV exists, and nothing else.
	fn assembly(
		&mut self,
		nvs: &dyn NvDirectory,
		csmo: &CsmoData,
		automatic: bool,
		previous: Option<u8>,
	) -> Option<u8> {
		if previous.is_some() {
			return None;
		}
		if automatic
			|| csmo.extended.acknowledged()
			|| csmo.extended.poll()
			|| csmo.width() != 1
			|| csmo.extended.scope() != 0
			|| csmo.variant != 0
			|| csmo.nv_type == 0
		{
			return None;
		}
		find_local_nv_of_type(nvs, csmo, 0)
	}

	/// Enumerates the NVs of an assembly at the given selector offset.
	/// Called iteratively with the previously returned index until it
	/// answers `None`.
	///
	/// The default models width-1 assemblies whose number equals their NV
	/// index.
	fn nv_index(&mut self, assembly: u8, offset: u8, previous: Option<usize>) -> Option<usize> {
		if previous.is_none() && offset == 0 {
			Some(usize::from(assembly))
		} else {
			None
		}
	}

	/// The width, in selectors, of an assembly.
	fn width(&mut self, assembly: u8) -> u8 {
		let _ = assembly;
		1
	}

	/// The group id a locally hosted connection of this assembly binds to.
	fn primary_group(&mut self, assembly: u8) -> u8 {
		0x80 | assembly
	}

	/// Gates heartbeats: answer `true` to have the engine propagate the
	/// bound output NV in the current broadcast slot.
	fn query_heartbeat(&mut self, nv_index: usize) -> bool {
		let _ = nv_index;
		false
	}

	/// Gates the application's use of a broadcast slot. Only consulted when
	/// [`Flags::APPLICATION_PERIODIC`](crate::Flags::APPLICATION_PERIODIC)
	/// is set; answer `true` after sending to consume the slot.
	fn create_periodic_msg(&mut self) -> bool {
		false
	}

	/// Reports a user-interface transition. The parameter carries the
	/// affected assembly, or an event-specific value; 0xff means none.
	fn update_user_interface(&mut self, event: Event, parameter: u8) {
		let _ = (event, parameter);
	}

	/// Reports an observability event. Only called when
	/// [`Flags::SUPPLY_DIAGNOSTICS`](crate::Flags::SUPPLY_DIAGNOSTICS) is
	/// set.
	fn update_diagnostics(&mut self, event: Diagnostic, parameter: u8) {
		let _ = (event, parameter);
	}
}
