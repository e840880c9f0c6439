//! Interoperable Self-Installation (ISI) engine.
//!
//! ISI lets control-network devices form, discover, maintain and tear down
//! network variable connections among themselves without a central
//! commissioning tool. Each participating device runs one [`Engine`], driven
//! by exactly two entry points: [`Engine::tick`], called every 250 ms, and
//! the inbound message callbacks ([`Engine::approve_msg`],
//! [`Engine::process_msg`], [`Engine::process_response`]). Neither suspends;
//! every wait in the protocol is a tick counter.
//!
//! The engine does not own a link stack. It talks to the underlying LonTalk
//! stack through the [`stack::Stack`] trait and to the host application
//! through the [`app::Application`] trait; wire formats live in the
//! [`isi_spec`] crate, re-exported here as [`spec`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

pub use isi_spec as spec;

pub mod app;
pub mod stack;

mod acquisition;
mod binder;
mod connection;
mod ctrl;
mod das;
mod engine;
mod enrollment;
mod error;
mod heartbeat;
mod persist;
mod rand;
mod scheduler;
mod selector;
mod transport;

pub use crate::app::{find_local_nv_of_type, AbortReason, Application, Diagnostic, Event, NvDirectory};
pub use crate::engine::{Config, DomainId, Engine, Flags, Kind};
pub use crate::error::Error;
pub use crate::persist::{BootType, PersistenceLoss};
pub use crate::stack::Stack;
pub use crate::transport::Transport;
