//! The controlled-enrollment side channel.
//!
//! Request/response messages sent unicast with unique-id addressing let a
//! managing device drive another device's enrollment as if its buttons were
//! pressed, and read its connection table record by record.

use isi_spec::msg::{CtrlOp, Ctrq, Rdct};
use isi_spec::record::ConnectionState;
use isi_spec::{Code, UniqueId, NO_ASSEMBLY};
use zerocopy::AsBytes;

use crate::app::Application;
use crate::engine::{read_padded, PRIMARY_DOMAIN};
use crate::stack::{Correlator, ServiceType, Stack};
use crate::{Engine, Error, Flags};

const CTR_RETRIES: u8 = 3;
const RDC_RETRIES: u8 = 3;

impl<S: Stack, A: Application> Engine<S, A> {
	/// Handles a controlled-enrollment request (CTRQ) or a connection table
	/// read (RDCT). Answers whether the message was processed.
	pub fn process_ctrl_enrollment_request(
		&mut self,
		code: u8,
		data: &[u8],
		correlator: Correlator,
	) -> bool {
		if code != isi_spec::APPLICATION_CODE || data.is_empty() {
			return false;
		}
		match Code::try_from(data[0]) {
			Ok(Code::Ctrq) => {
				self.process_ctrq(&read_padded(&data[1..]), correlator);
				true
			}
			Ok(Code::Rdct) => {
				self.process_rdct(&read_padded(&data[1..]), correlator);
				true
			}
			_ => false,
		}
	}

	fn process_ctrq(&mut self, ctrq: &Ctrq, correlator: Correlator) {
		let mut processed = false;
		if self.flags.contains(Flags::CONTROLLED_ENROLLMENT) {
			processed = match CtrlOp::try_from(ctrq.control) {
				Ok(CtrlOp::Open) => {
					self.send_ctrp(true, correlator);
					let _ = self.open_enrollment(ctrq.parameter);
					true
				}
				Ok(CtrlOp::Create) => {
					self.send_ctrp(true, correlator);
					let _ = self.create_enrollment(ctrq.parameter);
					true
				}
				Ok(CtrlOp::Cancel) => {
					self.send_ctrp(true, correlator);
					let _ = self.cancel_enrollment();
					true
				}
				Ok(CtrlOp::Factory) => {
					self.send_ctrp(true, correlator);
					let _ = self.return_to_factory_defaults();
					true
				}
				Err(_) => false,
			};
		}
		if !processed {
			self.send_ctrp(false, correlator);
		}
	}

	fn process_rdct(&mut self, rdct: &Rdct, correlator: Correlator) {
		let size = self.connections.len();
		let mut index = size;

		if self.flags.contains(Flags::CONTROLLED_ENROLLMENT) {
			index = usize::from(rdct.index);
			if rdct.host != NO_ASSEMBLY {
				while index < size {
					let record = self.connections.get(index);
					if record.state() >= ConnectionState::InUse && record.host == rdct.host {
						break;
					}
					index += 1;
				}
			} else if rdct.member != NO_ASSEMBLY {
				while index < size {
					let record = self.connections.get(index);
					if record.state() >= ConnectionState::InUse && record.member == rdct.member {
						break;
					}
					index += 1;
				}
			}
		}

		self.send_connection_table_response(index, index < size, correlator);
	}

	fn send_ctrp(&mut self, success: bool, correlator: Correlator) {
		let mut payload = [0u8; 8];
		payload[0] = Code::Ctrp.into();
		payload[1] = u8::from(success);
		payload[2..8].copy_from_slice(&self.stack.unique_id());
		self.stack
			.send_response(correlator, isi_spec::APPLICATION_CODE, &payload);
	}

	fn send_connection_table_response(
		&mut self,
		index: usize,
		success: bool,
		correlator: Correlator,
	) {
		if success {
			let record = self.connections.get(index);
			let mut payload = [0u8; 15];
			payload[0] = Code::Rdcs.into();
			payload[1] = index as u8;
			payload[2..15].copy_from_slice(record.as_bytes());
			self.stack
				.send_response(correlator, isi_spec::APPLICATION_CODE, &payload);
		} else {
			self.stack.send_response(
				correlator,
				isi_spec::APPLICATION_CODE,
				&[Code::Rdcf.into()],
			);
		}
	}

	fn control_command(
		&mut self,
		unique_id: &UniqueId,
		assembly: u8,
		op: CtrlOp,
	) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		// Cancel all pending enrollment UI first, as a local button press
		// would.
		self.update_ui_normal();

		let ctrq = Ctrq {
			control: op.into(),
			parameter: assembly,
		};
		let destination = self.nid_destination(PRIMARY_DOMAIN, *unique_id);
		self.send_isi(
			ServiceType::Request,
			&destination,
			CTR_RETRIES,
			Code::Ctrq,
			ctrq.as_bytes(),
		);
		Ok(())
	}

	/// Asks the device at `unique_id` to open enrollment for `assembly`.
	pub fn open_controlled_enrollment(
		&mut self,
		unique_id: &UniqueId,
		assembly: u8,
	) -> Result<(), Error> {
		self.control_command(unique_id, assembly, CtrlOp::Open)
	}

	/// Asks the device at `unique_id` to create the pending enrollment.
	pub fn create_controlled_enrollment(
		&mut self,
		unique_id: &UniqueId,
		assembly: u8,
	) -> Result<(), Error> {
		self.control_command(unique_id, assembly, CtrlOp::Create)
	}

	/// Asks the device at `unique_id` to cancel its pending enrollment.
	pub fn cancel_controlled_enrollment(
		&mut self,
		unique_id: &UniqueId,
		assembly: u8,
	) -> Result<(), Error> {
		self.control_command(unique_id, assembly, CtrlOp::Cancel)
	}

	/// Requests the connection table record at `index` from the device at
	/// `unique_id`, optionally constrained to records hosting or joining
	/// the given assemblies.
	pub fn request_connection_table(
		&mut self,
		unique_id: &UniqueId,
		index: u8,
		host: u8,
		member: u8,
	) -> Result<(), Error> {
		if !self.running {
			return Err(Error::NotRunning);
		}
		let rdct = Rdct {
			index,
			host,
			member,
		};
		let destination = self.nid_destination(PRIMARY_DOMAIN, *unique_id);
		self.send_isi(
			ServiceType::Request,
			&destination,
			RDC_RETRIES,
			Code::Rdct,
			rdct.as_bytes(),
		);
		Ok(())
	}
}
