// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for pool activity.
#[derive(Debug, Default)]
pub struct PoolMetrics {
	opened: AtomicU64,
	reused: AtomicU64,
	evicted: AtomicU64,
	closed: AtomicU64,
	exhausted: AtomicU64,
}
impl PoolMetrics {
	/// Connections opened against the database.
	pub fn opened(&self) -> u64 {
		self.opened.load(Ordering::Relaxed)
	}

	/// Acquisitions served by a free connection.
	pub fn reused(&self) -> u64 {
		self.reused.load(Ordering::Relaxed)
	}

	/// Free connections closed to make room for another subject.
	pub fn evicted(&self) -> u64 {
		self.evicted.load(Ordering::Relaxed)
	}

	/// Connections closed for any reason, evictions included.
	pub fn closed(&self) -> u64 {
		self.closed.load(Ordering::Relaxed)
	}

	/// Acquisitions that gave up waiting for capacity.
	pub fn exhausted(&self) -> u64 {
		self.exhausted.load(Ordering::Relaxed)
	}

	pub(crate) fn record_opened(&self) {
		self.opened.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_reused(&self) {
		self.reused.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_evicted(&self) {
		self.evicted.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_closed(&self) {
		self.closed.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_exhausted(&self) {
		self.exhausted.fetch_add(1, Ordering::Relaxed);
	}
}
