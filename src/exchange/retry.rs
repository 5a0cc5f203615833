//! Bounded exponential backoff with full jitter for transient provider failures.

// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, error::ConfigError};

/// Retry schedule applied to `ProviderUnavailable` failures.
///
/// Attempt `n` (1-based) sleeps a uniformly random duration in
/// `[0, min(max_delay, base_delay * 2^(n-1))]`, unless the provider supplied a
/// `Retry-After` hint, which is honored as-is. All attempts share one total deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts, the first one included.
	pub max_attempts: u32,
	/// Backoff ceiling for the first retry.
	pub base_delay: StdDuration,
	/// Upper bound for any single backoff.
	pub max_delay: StdDuration,
	/// Budget for the whole exchange, retries and sleeps included.
	pub deadline: StdDuration,
}
impl RetryPolicy {
	/// Overrides the attempt limit.
	pub fn with_max_attempts(mut self, attempts: u32) -> Self {
		self.max_attempts = attempts;

		self
	}

	/// Overrides the base delay.
	pub fn with_base_delay(mut self, delay: StdDuration) -> Self {
		self.base_delay = delay;

		self
	}

	/// Overrides the per-sleep cap.
	pub fn with_max_delay(mut self, delay: StdDuration) -> Self {
		self.max_delay = delay;

		self
	}

	/// Overrides the total deadline.
	pub fn with_deadline(mut self, deadline: StdDuration) -> Self {
		self.deadline = deadline;

		self
	}

	/// Checks the policy invariants.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_attempts == 0 {
			return Err(ConfigError::InvalidSetting { reason: "retry attempts must be at least 1" });
		}
		if self.deadline.is_zero() {
			return Err(ConfigError::InvalidSetting { reason: "exchange deadline must be non-zero" });
		}
		if self.max_delay < self.base_delay {
			return Err(ConfigError::InvalidSetting {
				reason: "maximum retry delay must not be below the base delay",
			});
		}

		Ok(())
	}

	/// Delay before the retry that follows failed attempt `attempt` (1-based).
	pub fn delay_after(&self, attempt: u32, retry_after: Option<Duration>) -> StdDuration {
		if let Some(hint) = retry_after.and_then(|hint| StdDuration::try_from(hint).ok()) {
			return hint;
		}

		let ceiling = self.backoff_ceiling(attempt);

		if ceiling.is_zero() {
			return ceiling;
		}

		rand::rng().random_range(StdDuration::ZERO..=ceiling)
	}

	fn backoff_ceiling(&self, attempt: u32) -> StdDuration {
		let shift = attempt.saturating_sub(1).min(16);

		self.base_delay.saturating_mul(1 << shift).min(self.max_delay)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: StdDuration::from_millis(200),
			max_delay: StdDuration::from_secs(2),
			deadline: StdDuration::from_secs(10),
		}
	}
}
