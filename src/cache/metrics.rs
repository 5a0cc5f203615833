// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for token cache lookups.
#[derive(Debug, Default)]
pub struct CacheMetrics {
	hits: AtomicU64,
	misses: AtomicU64,
	exchanges: AtomicU64,
	evictions: AtomicU64,
}
impl CacheMetrics {
	/// Lookups answered from a fresh cached token.
	pub fn hits(&self) -> u64 {
		self.hits.load(Ordering::Relaxed)
	}

	/// Lookups that had to wait for an exchange (led or joined).
	pub fn misses(&self) -> u64 {
		self.misses.load(Ordering::Relaxed)
	}

	/// Exchanges actually started by the cache.
	pub fn exchanges(&self) -> u64 {
		self.exchanges.load(Ordering::Relaxed)
	}

	/// Entries removed by session end, idle expiry, or token expiry.
	pub fn evictions(&self) -> u64 {
		self.evictions.load(Ordering::Relaxed)
	}

	pub(crate) fn record_hit(&self) {
		self.hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_miss(&self) {
		self.misses.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_exchange(&self) {
		self.exchanges.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_evictions(&self, count: usize) {
		self.evictions.fetch_add(count as u64, Ordering::Relaxed);
	}
}
