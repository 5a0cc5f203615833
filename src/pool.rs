//! Bounded pool of subject-bound database connections.
//!
//! Every connection is authenticated with exactly one subject's token and lives in that
//! subject's partition. A free connection is only ever leased back to the same subject.
//! When the pool is full, the least recently used free connection of any subject is closed
//! to make room; leased connections are never taken from their holder.
//!
//! One subject may hold several leases at once (parallel queries within a session); the
//! pool bound is the only limit.

pub mod connection;
mod metrics;

pub use connection::*;
pub use metrics::*;

// std
use std::{
	pin::pin,
	sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};
// crates.io
use tokio::{
	sync::Notify,
	task::JoinHandle,
	time::{self as tokio_time, Instant as TokioInstant, MissedTickBehavior},
};
// self
use crate::{
	_prelude::*,
	auth::{DelegatedToken, SubjectId},
	db::{ConnectParams, DatabaseConnection, DatabaseConnector, DatabaseTarget},
	error::{ConfigError, ConnectionError},
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
	shard::Sharded,
};

/// Pool sizing and timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
	/// Maximum number of open connections across all subjects.
	pub max_size: usize,
	/// How long `acquire` waits for capacity when every connection is leased.
	pub acquire_timeout: StdDuration,
	/// Bound on opening one connection.
	pub connect_timeout: StdDuration,
	/// Free connections unused for this long are closed by the reaper.
	pub idle_timeout: StdDuration,
	/// Interval of the background reaper.
	pub sweep_interval: StdDuration,
}
impl PoolConfig {
	/// Checks the configuration invariants.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_size == 0 {
			return Err(ConfigError::InvalidSetting { reason: "pool max size must be at least 1" });
		}
		if self.connect_timeout.is_zero() {
			return Err(ConfigError::InvalidSetting {
				reason: "pool connect timeout must be non-zero",
			});
		}
		if self.sweep_interval.is_zero() {
			return Err(ConfigError::InvalidSetting {
				reason: "pool sweep interval must be non-zero",
			});
		}
		if self.idle_timeout.is_zero() {
			return Err(ConfigError::InvalidSetting {
				reason: "pool idle timeout must be non-zero",
			});
		}

		Ok(())
	}
}
impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			max_size: 10,
			acquire_timeout: StdDuration::from_secs(30),
			connect_timeout: StdDuration::from_secs(15),
			idle_timeout: StdDuration::from_secs(10 * 60),
			sweep_interval: StdDuration::from_secs(60),
		}
	}
}

/// Point-in-time pool occupancy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
	/// Configured bound.
	pub max_size: usize,
	/// Open connections, including ones still connecting.
	pub open: usize,
	/// Connections in the free set.
	pub free: usize,
	/// Connections currently leased.
	pub leased: usize,
	/// Whether [`Pool::close`] has been called.
	pub closed: bool,
}

/// Cheaply cloneable handle to a connection pool.
#[derive(Clone)]
pub struct Pool {
	shared: Arc<PoolShared>,
}
impl Pool {
	/// Creates an empty pool; connections are opened on demand.
	pub fn new(
		connector: Arc<dyn DatabaseConnector>,
		target: DatabaseTarget,
		config: PoolConfig,
	) -> Self {
		Self {
			shared: Arc::new(PoolShared {
				connector,
				target,
				config,
				partitions: Sharded::default(),
				open: AtomicUsize::new(0),
				capacity: Notify::new(),
				closed: AtomicBool::new(false),
				next_id: AtomicU64::new(1),
				metrics: Default::default(),
			}),
		}
	}

	/// Leases a connection authenticated with `token` for `subject`.
	pub async fn acquire(
		&self,
		subject: &SubjectId,
		token: &DelegatedToken,
	) -> Result<PooledConnection> {
		const KIND: OperationKind = OperationKind::PoolAcquire;

		let span = OperationSpan::new(KIND, "acquire").with_subject(subject);

		obs::record_operation_outcome(KIND, OperationOutcome::Attempt);

		let result = span.instrument(self.shared.acquire(subject, token)).await;

		obs::record_operation_outcome(KIND, OperationOutcome::of(&result));

		result
	}

	/// Returns a leased connection.
	///
	/// It re-enters the free set only when its token is unexpired, it is healthy, and the
	/// pool is open; otherwise it is closed.
	pub async fn release(&self, mut conn: PooledConnection) {
		const KIND: OperationKind = OperationKind::PoolRelease;

		let Some(inner) = conn.conn.take() else { return };
		let span = OperationSpan::new(KIND, "release").with_subject(conn.subject());
		let usable = !conn.invalid && inner.is_healthy();
		let pool = conn.pool.clone();

		obs::record_operation_outcome(KIND, OperationOutcome::Attempt);
		span.instrument(pool.check_in(conn.id, conn.binding.clone(), inner, usable)).await;
		obs::record_operation_outcome(KIND, OperationOutcome::Success);
	}

	/// Closes the subject's free connections (session end). Returns the count.
	pub async fn purge_subject(&self, subject: &SubjectId) -> usize {
		let drained = {
			let mut shard = self.shared.partitions.shard(subject).lock();
			let drained = shard
				.get_mut(subject)
				.map(|partition| partition.free.drain(..).collect::<Vec<_>>())
				.unwrap_or_default();

			prune(&mut shard, subject);

			drained
		};
		let count = drained.len();

		self.shared.close_idle(drained).await;

		count
	}

	/// Closes free connections whose token expired, that went unhealthy, or that sat idle
	/// past the idle timeout. Returns the count.
	pub async fn reap(&self) -> usize {
		self.shared.reap().await
	}

	/// Closes every free connection and refuses further acquisitions.
	///
	/// Leased connections are closed when they come back.
	pub async fn close(&self) {
		self.shared.closed.store(true, Ordering::SeqCst);

		let mut drained = Vec::new();

		for shard in self.shared.partitions.iter() {
			let mut shard = shard.lock();

			for partition in shard.values_mut() {
				drained.extend(partition.free.drain(..));
			}

			shard.retain(|_, partition| !partition.is_empty());
		}

		self.shared.close_idle(drained).await;
		self.shared.capacity.notify_waiters();
	}

	/// Current occupancy.
	pub fn status(&self) -> PoolStatus {
		let (free, leased) = self.shared.partitions.iter().fold((0, 0), |(free, leased), shard| {
			shard.lock().values().fold((free, leased), |(free, leased), partition| {
				(free + partition.free.len(), leased + partition.leased)
			})
		});

		PoolStatus {
			max_size: self.shared.config.max_size,
			open: self.shared.open.load(Ordering::SeqCst),
			free,
			leased,
			closed: self.shared.closed.load(Ordering::SeqCst),
		}
	}

	/// Free connections currently held for `subject`.
	pub fn free_for(&self, subject: &SubjectId) -> usize {
		self.shared
			.partitions
			.shard(subject)
			.lock()
			.get(subject)
			.map_or(0, |partition| partition.free.len())
	}

	/// Pool configuration.
	pub fn config(&self) -> &PoolConfig {
		&self.shared.config
	}

	/// Shared pool counters.
	pub fn metrics(&self) -> &Arc<PoolMetrics> {
		&self.shared.metrics
	}

	/// Spawns the periodic reaper. The task ends once every pool handle is dropped.
	pub fn spawn_reaper(&self) -> JoinHandle<()> {
		let shared = Arc::downgrade(&self.shared);
		let period = self.shared.config.sweep_interval;

		tokio::spawn(async move {
			let mut ticker = tokio_time::interval_at(TokioInstant::now() + period, period);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				ticker.tick().await;

				let Some(shared) = shared.upgrade() else { break };

				if shared.closed.load(Ordering::SeqCst) {
					break;
				}

				let reaped = shared.reap().await;

				if reaped > 0 {
					obs::debug_event(
						OperationKind::Reap,
						&format!("closed {reaped} expired or idle pooled connections"),
					);
				}
			}
		})
	}
}
impl Debug for Pool {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Pool")
			.field("target", &self.shared.target.server)
			.field("status", &self.status())
			.finish()
	}
}

struct IdleConnection {
	id: u64,
	binding: ConnectionBinding,
	conn: Box<dyn DatabaseConnection>,
	last_used: TokioInstant,
}

#[derive(Default)]
struct Partition {
	// Oldest at the front, most recently released at the back.
	free: VecDeque<IdleConnection>,
	leased: usize,
}
impl Partition {
	fn is_empty(&self) -> bool {
		self.free.is_empty() && self.leased == 0
	}
}

struct PoolShared {
	connector: Arc<dyn DatabaseConnector>,
	target: DatabaseTarget,
	config: PoolConfig,
	partitions: Sharded<SubjectId, Partition>,
	open: AtomicUsize,
	capacity: Notify,
	closed: AtomicBool,
	next_id: AtomicU64,
	metrics: Arc<PoolMetrics>,
}
impl PoolShared {
	async fn acquire(
		self: &Arc<Self>,
		subject: &SubjectId,
		token: &DelegatedToken,
	) -> Result<PooledConnection> {
		self.ensure_open()?;

		if token.subject() != subject {
			obs::subject_violation(OperationKind::PoolAcquire, token.subject(), subject);

			return Err(Error::SubjectMismatch {
				bound: token.subject().clone(),
				requested: subject.clone(),
			});
		}
		if token.is_expired() {
			return Err(ConnectionError::ExpiredToken { expired_at: token.expires_at() }.into());
		}

		let started = TokioInstant::now();
		let deadline = started + self.config.acquire_timeout;

		loop {
			let mut capacity = pin!(self.capacity.notified());

			capacity.as_mut().enable();
			self.ensure_open()?;

			let mut stale = Vec::new();
			let reused = self.checkout_free(subject, token, &mut stale);

			self.close_idle(stale).await;

			if let Some(conn) = reused? {
				self.metrics.record_reused();

				return Ok(conn);
			}
			if let Some(slot) = self.reserve_slot() {
				return self.open(slot, subject, token).await;
			}
			if let Some(victim) = self.take_lru_free() {
				let slot = SlotReservation { pool: self.clone(), armed: true };

				self.metrics.record_evicted();
				self.metrics.record_closed();
				obs::debug_event(
					OperationKind::PoolAcquire,
					&format!("evicting free connection of `{}` to make room", victim.binding.subject),
				);
				victim.conn.close().await;

				return self.open(slot, subject, token).await;
			}
			if tokio_time::timeout_at(deadline, capacity).await.is_err() {
				self.metrics.record_exhausted();

				return Err(ConnectionError::PoolExhausted {
					max_size: self.config.max_size,
					waited: started.elapsed(),
				}
				.into());
			}
		}
	}

	fn ensure_open(&self) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(ConnectionError::PoolClosed.into());
		}

		Ok(())
	}

	/// Takes the most recently used free connection of `subject` that can serve `token`.
	///
	/// Connections that cannot are moved to `stale` for closing.
	fn checkout_free(
		self: &Arc<Self>,
		subject: &SubjectId,
		token: &DelegatedToken,
		stale: &mut Vec<IdleConnection>,
	) -> Result<Option<PooledConnection>> {
		let now = OffsetDateTime::now_utc();
		let mut shard = self.partitions.shard(subject).lock();
		let Some(partition) = shard.get_mut(subject) else { return Ok(None) };

		while let Some(idle) = partition.free.pop_back() {
			if idle.binding.subject != *subject {
				obs::subject_violation(OperationKind::PoolAcquire, &idle.binding.subject, subject);

				let err =
					Error::SubjectMismatch { bound: idle.binding.subject.clone(), requested: subject.clone() };

				stale.push(idle);

				return Err(err);
			}
			if idle.conn.is_healthy() && idle.binding.can_serve(token, now) {
				partition.leased += 1;

				return Ok(Some(PooledConnection::new(self.clone(), idle.id, idle.binding, idle.conn)));
			}

			stale.push(idle);
		}

		prune(&mut shard, subject);

		Ok(None)
	}

	fn reserve_slot(self: &Arc<Self>) -> Option<SlotReservation> {
		self.open
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |open| {
				(open < self.config.max_size).then_some(open + 1)
			})
			.ok()
			.map(|_| SlotReservation { pool: self.clone(), armed: true })
	}

	/// Removes the least recently used free connection of any subject.
	fn take_lru_free(&self) -> Option<IdleConnection> {
		loop {
			let mut oldest: Option<(usize, TokioInstant)> = None;

			for (index, shard) in self.partitions.iter().enumerate() {
				for partition in shard.lock().values() {
					if let Some(front) = partition.free.front()
						&& oldest.is_none_or(|(_, at)| front.last_used < at)
					{
						oldest = Some((index, front.last_used));
					}
				}
			}

			let (index, _) = oldest?;
			let mut shard = self.partitions.iter().nth(index)?.lock();
			let victim = shard
				.iter()
				.filter_map(|(subject, partition)| {
					partition.free.front().map(|idle| (subject.clone(), idle.last_used))
				})
				.min_by_key(|(_, at)| *at);

			// The shard drained between the scan and the lock; scan again.
			let Some((subject, _)) = victim else { continue };
			let idle = shard.get_mut(&subject).and_then(|partition| partition.free.pop_front());

			prune(&mut shard, &subject);

			if idle.is_some() {
				return idle;
			}
		}
	}

	async fn open(
		self: &Arc<Self>,
		slot: SlotReservation,
		subject: &SubjectId,
		token: &DelegatedToken,
	) -> Result<PooledConnection> {
		let params = ConnectParams::new(self.target.clone(), token);
		let timeout = self.config.connect_timeout;
		let conn = match tokio_time::timeout(timeout, self.connector.connect(&params)).await {
			Ok(Ok(conn)) => conn,
			Ok(Err(source)) => {
				obs::warn_event(
					OperationKind::PoolAcquire,
					&format!("database connection failed: {source}"),
				);

				return Err(ConnectionError::Open { source }.into());
			},
			Err(_) => return Err(ConnectionError::ConnectTimedOut { after: timeout }.into()),
		};
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);

		self.partitions.shard(subject).lock().entry(subject.clone()).or_default().leased += 1;
		slot.disarm();
		self.metrics.record_opened();

		Ok(PooledConnection::new(self.clone(), id, ConnectionBinding::of(token), conn))
	}

	async fn check_in(
		&self,
		id: u64,
		binding: ConnectionBinding,
		conn: Box<dyn DatabaseConnection>,
		usable: bool,
	) {
		let subject = binding.subject.clone();
		let reusable = usable && !binding.is_expired_at(OffsetDateTime::now_utc());
		let rejected = {
			let mut shard = self.partitions.shard(&subject).lock();
			let partition = shard.entry(subject.clone()).or_default();

			partition.leased = partition.leased.saturating_sub(1);

			// Checked under the shard lock so `close` cannot miss this connection.
			if reusable && !self.closed.load(Ordering::SeqCst) {
				partition.free.push_back(IdleConnection {
					id,
					binding,
					conn,
					last_used: TokioInstant::now(),
				});

				None
			} else {
				prune(&mut shard, &subject);

				Some(conn)
			}
		};

		match rejected {
			Some(conn) => self.close_connection(conn).await,
			None => self.capacity.notify_waiters(),
		}
	}

	fn forget_lease(&self, subject: &SubjectId) {
		let mut shard = self.partitions.shard(subject).lock();

		if let Some(partition) = shard.get_mut(subject) {
			partition.leased = partition.leased.saturating_sub(1);
		}

		prune(&mut shard, subject);
	}

	async fn reap(&self) -> usize {
		let now = TokioInstant::now();
		let wall = OffsetDateTime::now_utc();
		let idle_timeout = self.config.idle_timeout;
		let mut reaped = Vec::new();

		for shard in self.partitions.iter() {
			let mut shard = shard.lock();

			for partition in shard.values_mut() {
				let (keep, expired): (VecDeque<_>, VecDeque<_>) =
					partition.free.drain(..).partition(|idle| {
						idle.conn.is_healthy()
							&& !idle.binding.is_expired_at(wall)
							&& now.saturating_duration_since(idle.last_used) < idle_timeout
					});

				partition.free = keep;
				reaped.extend(expired);
			}

			shard.retain(|_, partition| !partition.is_empty());
		}

		let count = reaped.len();

		self.close_idle(reaped).await;

		count
	}

	async fn close_idle(&self, idle: Vec<IdleConnection>) {
		for idle in idle {
			self.close_connection(idle.conn).await;
		}
	}

	async fn close_connection(&self, conn: Box<dyn DatabaseConnection>) {
		conn.close().await;
		self.open.fetch_sub(1, Ordering::SeqCst);
		self.metrics.record_closed();
		self.capacity.notify_waiters();
	}
}

/// Capacity slot held while a connection is being opened; returned on drop unless disarmed.
struct SlotReservation {
	pool: Arc<PoolShared>,
	armed: bool,
}
impl SlotReservation {
	fn disarm(mut self) {
		self.armed = false;
	}
}
impl Drop for SlotReservation {
	fn drop(&mut self) {
		if self.armed {
			self.pool.open.fetch_sub(1, Ordering::SeqCst);
			self.pool.capacity.notify_waiters();
		}
	}
}

fn prune(shard: &mut HashMap<SubjectId, Partition>, subject: &SubjectId) {
	if shard.get(subject).is_some_and(Partition::is_empty) {
		shard.remove(subject);
	}
}
