// self
use crate::{_prelude::*, obs::OperationKind};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOperation<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOperation<F> = F;

/// Span wrapper used around crate operations.
#[derive(Clone, Debug)]
pub struct OperationSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OperationSpan {
	/// Creates a span tagged with the operation kind and stage.
	pub fn new(kind: OperationKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"obo_sql.operation",
				operation = kind.as_str(),
				stage,
				subject = tracing::field::Empty,
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Records the subject the operation runs for.
	pub fn with_subject(self, subject: &str) -> Self {
		#[cfg(feature = "tracing")]
		self.span.record("subject", subject);
		#[cfg(not(feature = "tracing"))]
		let _ = subject;

		self
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> OperationSpanGuard {
		#[cfg(feature = "tracing")]
		{
			OperationSpanGuard { guard: self.span.entered() }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = self;

			OperationSpanGuard {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOperation<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// RAII guard returned by [`OperationSpan::entered`].
pub struct OperationSpanGuard {
	#[cfg(feature = "tracing")]
	#[allow(dead_code)]
	guard: tracing::span::EnteredSpan,
}
impl Debug for OperationSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("OperationSpanGuard(..)")
	}
}

/// Emits a warning event (when tracing is enabled) for a recoverable anomaly.
pub fn warn_event(kind: OperationKind, message: &str) {
	#[cfg(feature = "tracing")]
	tracing::warn!(operation = kind.as_str(), "{message}");
	#[cfg(not(feature = "tracing"))]
	let _ = (kind, message);
}

/// Emits a debug event (when tracing is enabled) describing routine lifecycle activity.
pub fn debug_event(kind: OperationKind, message: &str) {
	#[cfg(feature = "tracing")]
	tracing::debug!(operation = kind.as_str(), "{message}");
	#[cfg(not(feature = "tracing"))]
	let _ = (kind, message);
}

/// Emits an error event for an attempted cross-subject credential use.
pub fn subject_violation(kind: OperationKind, bound: &str, requested: &str) {
	#[cfg(feature = "tracing")]
	tracing::error!(
		operation = kind.as_str(),
		bound,
		requested,
		"refusing to hand a credential to a different subject"
	);
	#[cfg(not(feature = "tracing"))]
	let _ = (kind, bound, requested);
}
