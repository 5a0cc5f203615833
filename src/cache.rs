//! Per-subject delegated token cache with singleflight refresh.
//!
//! Each subject owns at most one token. A lookup is served from the cache while the
//! token has more than the refresh margin left; otherwise exactly one exchange runs
//! for that subject and every concurrent caller observes its outcome, success or
//! error. Entries disappear when the session ends ([`TokenCache::evict`]) or after the
//! idle TTL without lookups.

mod metrics;

pub use metrics::*;

// crates.io
use async_lock::OnceCell;
use tokio::{
	task::JoinHandle,
	time::{self as tokio_time, Instant as TokioInstant, MissedTickBehavior},
};
// self
use crate::{
	_prelude::*,
	auth::{DelegatedToken, SubjectId, UserAssertion},
	error::{AssertionError, ConfigError},
	exchange::TokenExchange,
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
	shard::Sharded,
};

const KIND: OperationKind = OperationKind::TokenCache;

type Flight = OnceCell<Result<DelegatedToken>>;

/// Largest accepted refresh margin.
pub const MAX_REFRESH_MARGIN: StdDuration = StdDuration::from_secs(24 * 60 * 60);

/// Token cache tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
	/// Tokens with this much time left or less are re-exchanged before use.
	pub refresh_margin: StdDuration,
	/// Entries not looked up for this long are dropped.
	pub idle_ttl: StdDuration,
	/// Interval of the background idle sweep.
	pub sweep_interval: StdDuration,
}
impl CacheConfig {
	/// Checks the configuration invariants.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.idle_ttl.is_zero() {
			return Err(ConfigError::InvalidSetting { reason: "token idle TTL must be non-zero" });
		}
		if self.sweep_interval.is_zero() {
			return Err(ConfigError::InvalidSetting {
				reason: "token sweep interval must be non-zero",
			});
		}
		if self.refresh_margin > MAX_REFRESH_MARGIN {
			return Err(ConfigError::InvalidSetting {
				reason: "refresh margin must not exceed one day",
			});
		}

		Ok(())
	}

	fn margin(&self) -> Duration {
		Duration::try_from(self.refresh_margin.min(MAX_REFRESH_MARGIN)).unwrap_or(Duration::DAY)
	}
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			refresh_margin: StdDuration::from_secs(5 * 60),
			idle_ttl: StdDuration::from_secs(30 * 60),
			sweep_interval: StdDuration::from_secs(60),
		}
	}
}

#[derive(Debug)]
struct CacheEntry {
	token: DelegatedToken,
	last_access: TokioInstant,
}

#[derive(Debug, Default)]
struct SubjectSlot {
	entry: Option<CacheEntry>,
	flight: Option<Arc<Flight>>,
}
impl SubjectSlot {
	fn is_vacant(&self) -> bool {
		self.entry.is_none() && self.flight.is_none()
	}
}

/// Subject-keyed cache in front of a [`TokenExchange`].
pub struct TokenCache {
	exchanger: Arc<dyn TokenExchange>,
	config: CacheConfig,
	slots: Sharded<SubjectId, SubjectSlot>,
	metrics: Arc<CacheMetrics>,
}
impl TokenCache {
	/// Creates a cache using the provided exchanger.
	pub fn new(exchanger: Arc<dyn TokenExchange>, config: CacheConfig) -> Self {
		Self { exchanger, config, slots: Sharded::default(), metrics: Default::default() }
	}

	/// Returns a token for `subject` that is outside the refresh margin, exchanging
	/// `assertion` when needed.
	pub async fn get_token(
		&self,
		subject: &SubjectId,
		assertion: &UserAssertion,
	) -> Result<DelegatedToken> {
		let span = OperationSpan::new(KIND, "get_token").with_subject(subject);

		obs::record_operation_outcome(KIND, OperationOutcome::Attempt);

		let result = span.instrument(self.lookup(subject, assertion)).await;

		obs::record_operation_outcome(KIND, OperationOutcome::of(&result));

		result
	}

	/// Drops the subject's token (session end). Returns `true` if one was cached.
	pub fn evict(&self, subject: &SubjectId) -> bool {
		let removed = self
			.slots
			.shard(subject)
			.lock()
			.remove(subject)
			.is_some_and(|slot| slot.entry.is_some());

		if removed {
			self.metrics.record_evictions(1);
		}

		removed
	}

	/// Removes entries idle past the TTL or holding expired tokens. Returns the count.
	pub fn purge_idle(&self) -> usize {
		self.purge_idle_at(TokioInstant::now(), OffsetDateTime::now_utc())
	}

	/// Number of subjects with a cached token.
	pub fn len(&self) -> usize {
		self.slots
			.iter()
			.map(|shard| shard.lock().values().filter(|slot| slot.entry.is_some()).count())
			.sum()
	}

	/// Returns `true` when no subject has a cached token.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Returns `true` when `subject` has a cached, non-idle token.
	pub fn contains(&self, subject: &SubjectId) -> bool {
		let now = TokioInstant::now();

		self.slots
			.shard(subject)
			.lock()
			.get(subject)
			.and_then(|slot| slot.entry.as_ref())
			.is_some_and(|entry| !self.is_idle(entry, now))
	}

	/// Cache configuration.
	pub fn config(&self) -> &CacheConfig {
		&self.config
	}

	/// Shared cache counters.
	pub fn metrics(&self) -> &Arc<CacheMetrics> {
		&self.metrics
	}

	/// Spawns the periodic idle sweep. The task ends once the cache is dropped.
	pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
		let cache = Arc::downgrade(self);
		let period = self.config.sweep_interval;

		tokio::spawn(async move {
			let mut ticker = tokio_time::interval_at(TokioInstant::now() + period, period);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				ticker.tick().await;

				let Some(cache) = cache.upgrade() else { break };
				let purged = cache.purge_idle();

				if purged > 0 {
					obs::debug_event(
						OperationKind::Reap,
						&format!("purged {purged} idle token cache entries"),
					);
				}
			}
		})
	}

	async fn lookup(&self, subject: &SubjectId, assertion: &UserAssertion) -> Result<DelegatedToken> {
		if assertion.subject() != subject {
			return Err(AssertionError::SubjectMismatch {
				expected: subject.clone(),
				actual: assertion.subject().clone(),
			}
			.into());
		}

		let flight = match self.cached_or_flight(subject, TokioInstant::now(), OffsetDateTime::now_utc())
		{
			Ok(token) => {
				self.metrics.record_hit();

				return Ok(token);
			},
			Err(flight) => flight,
		};

		self.metrics.record_miss();

		flight.get_or_init(|| self.lead_exchange(subject, assertion, &flight)).await.clone()
	}

	/// Returns the fresh cached token, or the flight every caller must join.
	fn cached_or_flight(
		&self,
		subject: &SubjectId,
		now: TokioInstant,
		wall: OffsetDateTime,
	) -> Result<DelegatedToken, Arc<Flight>> {
		let mut shard = self.slots.shard(subject).lock();
		let slot = shard.entry(subject.clone()).or_default();

		if let Some(entry) = slot.entry.as_mut() {
			if self.is_idle(entry, now) || entry.token.is_expired_at(wall) {
				slot.entry = None;

				self.metrics.record_evictions(1);
			} else if !entry.token.needs_refresh_at(wall, self.config.margin()) {
				entry.last_access = now;

				return Ok(entry.token.clone());
			}
		}

		Err(slot.flight.get_or_insert_with(Default::default).clone())
	}

	async fn lead_exchange(
		&self,
		subject: &SubjectId,
		assertion: &UserAssertion,
		flight: &Arc<Flight>,
	) -> Result<DelegatedToken> {
		self.metrics.record_exchange();

		let result = self.exchanger.exchange(assertion).await.and_then(|token| {
			if token.subject() != subject {
				obs::subject_violation(KIND, token.subject(), subject);

				return Err(Error::SubjectMismatch {
					bound: token.subject().clone(),
					requested: subject.clone(),
				});
			}

			Ok(token)
		});

		self.finish_flight(subject, flight, result.as_ref().ok());

		result
	}

	/// Detaches `flight` and stores its token, unless the session ended meanwhile.
	fn finish_flight(&self, subject: &SubjectId, flight: &Arc<Flight>, token: Option<&DelegatedToken>) {
		let mut shard = self.slots.shard(subject).lock();
		let Some(slot) = shard.get_mut(subject) else { return };

		if !slot.flight.as_ref().is_some_and(|current| Arc::ptr_eq(current, flight)) {
			return;
		}

		slot.flight = None;

		match token {
			Some(token) =>
				slot.entry =
					Some(CacheEntry { token: token.clone(), last_access: TokioInstant::now() }),
			None if slot.is_vacant() => {
				shard.remove(subject);
			},
			None => {},
		}
	}

	fn purge_idle_at(&self, now: TokioInstant, wall: OffsetDateTime) -> usize {
		let mut purged = 0;

		for shard in self.slots.iter() {
			let mut shard = shard.lock();

			shard.retain(|_, slot| {
				if slot
					.entry
					.as_ref()
					.is_some_and(|entry| self.is_idle(entry, now) || entry.token.is_expired_at(wall))
				{
					slot.entry = None;
					purged += 1;
				}

				!slot.is_vacant()
			});
		}

		self.metrics.record_evictions(purged);

		purged
	}

	fn is_idle(&self, entry: &CacheEntry, now: TokioInstant) -> bool {
		now.saturating_duration_since(entry.last_access) >= self.config.idle_ttl
	}
}
impl Debug for TokenCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenCache")
			.field("config", &self.config)
			.field("entries", &self.len())
			.finish()
	}
}
