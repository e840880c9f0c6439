use thiserror::Error;

/// Errors surfaced to callers of the engine API.
///
/// All errors are synchronous return values; recovery is the caller's.
/// Partial protocol failures inside the engine recover through timeouts and
/// are reported through [`Event::Aborted`](crate::Event::Aborted) instead.
#[derive(Error, PartialEq, Eq, Clone, Copy, Debug)]
pub enum Error {
	/// An operation was attempted before [`Engine::start`](crate::Engine::start).
	#[error("the engine is not running")]
	NotRunning,
	/// The connection table or the CID serial space is exhausted.
	#[error("no connection space")]
	NoConnectionSpace,
	/// The caller-provided domain id was rejected.
	#[error("invalid domain id")]
	InvalidDomain,
	/// A subnet or node index is out of range.
	#[error("invalid parameter")]
	InvalidParameter,
	/// A lookup failed.
	#[error("not found")]
	NotFound,
}
