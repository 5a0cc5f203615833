//! Aggregate configuration and environment loading.

// self
use crate::{
	_prelude::*,
	auth::ClientId,
	cache::CacheConfig,
	credential::CredentialStore,
	db::DatabaseTarget,
	error::ConfigError,
	exchange::RetryPolicy,
	pool::PoolConfig,
	provider::ProviderDescriptor,
};

/// Application (client) id registered with the identity provider.
pub const ENV_CLIENT_ID: &str = "AZURE_CLIENT_ID";
/// Client secret of the registered application.
pub const ENV_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
/// Directory (tenant) id.
pub const ENV_TENANT_ID: &str = "AZURE_TENANT_ID";
/// Database server host.
pub const ENV_SQL_SERVER: &str = "SQL_SERVER";
/// Database name.
pub const ENV_SQL_DATABASE: &str = "SQL_DATABASE";
/// Optional pool bound.
pub const ENV_POOL_MAX_SIZE: &str = "OBO_POOL_MAX_SIZE";
/// Optional refresh margin in seconds.
pub const ENV_REFRESH_MARGIN_SECS: &str = "OBO_REFRESH_MARGIN_SECS";
/// Optional token idle TTL in seconds.
pub const ENV_TOKEN_IDLE_TTL_SECS: &str = "OBO_TOKEN_IDLE_TTL_SECS";
/// Optional per-query timeout in seconds.
pub const ENV_QUERY_TIMEOUT_SECS: &str = "OBO_QUERY_TIMEOUT_SECS";

/// Everything needed to assemble a [`QueryFacade`](crate::facade::QueryFacade).
#[derive(Clone, Debug)]
pub struct OboConfig {
	/// Identity provider the exchanges target.
	pub provider: ProviderDescriptor,
	/// The application's own credential.
	pub credentials: CredentialStore,
	/// Database every pooled connection points at.
	pub database: DatabaseTarget,
	/// Token cache tuning.
	pub cache: CacheConfig,
	/// Pool sizing and timing.
	pub pool: PoolConfig,
	/// Exchange retry schedule.
	pub retry: RetryPolicy,
	/// Per-statement time budget; unbounded when `None`.
	pub query_timeout: Option<StdDuration>,
}
impl OboConfig {
	/// Creates a configuration with default cache, pool, and retry settings.
	pub fn new(
		provider: ProviderDescriptor,
		credentials: CredentialStore,
		database: DatabaseTarget,
	) -> Self {
		Self {
			provider,
			credentials,
			database,
			cache: CacheConfig::default(),
			pool: PoolConfig::default(),
			retry: RetryPolicy::default(),
			query_timeout: None,
		}
	}

	/// Replaces the cache settings.
	pub fn with_cache(mut self, cache: CacheConfig) -> Self {
		self.cache = cache;

		self
	}

	/// Replaces the pool settings.
	pub fn with_pool(mut self, pool: PoolConfig) -> Self {
		self.pool = pool;

		self
	}

	/// Replaces the retry policy.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Bounds every statement by `timeout`.
	pub fn with_query_timeout(mut self, timeout: StdDuration) -> Self {
		self.query_timeout = Some(timeout);

		self
	}

	/// Loads an Azure AD + Azure SQL configuration from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Loads a configuration from an arbitrary variable source.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let required = |name: &'static str| {
			lookup(name)
				.map(|value| value.trim().to_owned())
				.filter(|value| !value.is_empty())
				.ok_or(ConfigError::MissingEnv { name })
		};
		let client_id = ClientId::new(required(ENV_CLIENT_ID)?)?;
		let client_secret = required(ENV_CLIENT_SECRET)?;
		let provider = ProviderDescriptor::azure_ad(&required(ENV_TENANT_ID)?)?;
		let database = DatabaseTarget::new(required(ENV_SQL_SERVER)?, required(ENV_SQL_DATABASE)?);
		let mut config =
			Self::new(provider, CredentialStore::with_secret(client_id, client_secret), database);

		if let Some(max_size) = optional::<usize, _>(&lookup, ENV_POOL_MAX_SIZE)? {
			config.pool.max_size = max_size;
		}
		if let Some(secs) = optional::<u64, _>(&lookup, ENV_REFRESH_MARGIN_SECS)? {
			config.cache.refresh_margin = StdDuration::from_secs(secs);
		}
		if let Some(secs) = optional::<u64, _>(&lookup, ENV_TOKEN_IDLE_TTL_SECS)? {
			config.cache.idle_ttl = StdDuration::from_secs(secs);
		}

		config.query_timeout =
			optional::<u64, _>(&lookup, ENV_QUERY_TIMEOUT_SECS)?.map(StdDuration::from_secs);
		config.validate()?;

		Ok(config)
	}

	/// Checks every section.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.credentials.is_blank() {
			return Err(ConfigError::MissingEnv { name: ENV_CLIENT_SECRET });
		}

		self.database.validate()?;
		self.cache.validate()?;
		self.pool.validate()?;
		self.retry.validate()?;

		if self.query_timeout.is_some_and(|timeout| timeout.is_zero()) {
			return Err(ConfigError::InvalidSetting { reason: "query timeout must be non-zero" });
		}

		Ok(())
	}
}

fn optional<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
	T: FromStr,
	T::Err: Display,
	F: Fn(&str) -> Option<String>,
{
	let Some(raw) = lookup(name).filter(|value| !value.trim().is_empty()) else { return Ok(None) };

	raw.trim()
		.parse()
		.map(Some)
		.map_err(|err: T::Err| ConfigError::InvalidEnv { name, reason: err.to_string() })
}
