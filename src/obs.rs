//! Optional observability helpers for exchanges, cache lookups, and pool operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `obo_sql.operation` with the `operation`
//!   and `stage` (call site) fields, plus warning events for security-relevant rejections.
//! - Enable `metrics` to increment the `obo_sql_operation_total` counter for every
//!   attempt/success/failure, labeled by `operation` + `outcome`.
//!
//! Secrets never reach either sink: subjects and token fingerprints are the only
//! identifying fields recorded.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
	/// On-Behalf-Of token exchange against the provider.
	Exchange,
	/// Token cache lookup (hit or refresh).
	TokenCache,
	/// Pool acquisition.
	PoolAcquire,
	/// Pool release.
	PoolRelease,
	/// Query facade execution.
	Query,
	/// Background sweep of expired or idle resources.
	Reap,
}
impl OperationKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OperationKind::Exchange => "exchange",
			OperationKind::TokenCache => "token_cache",
			OperationKind::PoolAcquire => "pool_acquire",
			OperationKind::PoolRelease => "pool_release",
			OperationKind::Query => "query",
			OperationKind::Reap => "reap",
		}
	}
}
impl Display for OperationKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl OperationOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OperationOutcome::Attempt => "attempt",
			OperationOutcome::Success => "success",
			OperationOutcome::Failure => "failure",
		}
	}

	/// Maps a result into its outcome label.
	pub fn of<T, E>(result: &Result<T, E>) -> Self {
		if result.is_ok() { Self::Success } else { Self::Failure }
	}
}
impl Display for OperationOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
