//! Single entry point for running a statement on behalf of a signed-in user.
//!
//! `run_query` resolves the subject's token through the cache, leases a connection bound to
//! that token, executes with bound parameters, and always hands the connection back.

// crates.io
use tokio::{task::JoinHandle, time as tokio_time};
// self
use crate::{
	_prelude::*,
	auth::{SubjectId, UserAssertion},
	cache::TokenCache,
	db::{ResultSet, SqlValue, Statement},
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
	pool::{Pool, PooledConnection},
};
#[cfg(feature = "reqwest")]
use crate::{config::OboConfig, db::DatabaseConnector, exchange::OboExchanger};

const KIND: OperationKind = OperationKind::Query;

/// Orchestrates token cache, pool, and driver for per-user queries.
#[derive(Clone, Debug)]
pub struct QueryFacade {
	cache: Arc<TokenCache>,
	pool: Pool,
	query_timeout: Option<StdDuration>,
}
impl QueryFacade {
	/// Wires an existing cache and pool together.
	pub fn new(cache: Arc<TokenCache>, pool: Pool) -> Self {
		Self { cache, pool, query_timeout: None }
	}

	/// Builds the full stack (reqwest exchanger, cache, pool) from `config`.
	#[cfg(feature = "reqwest")]
	pub fn from_config(config: OboConfig, connector: Arc<dyn DatabaseConnector>) -> Result<Self> {
		config.validate()?;

		let exchanger =
			OboExchanger::new(config.provider, config.credentials)?.with_retry_policy(config.retry);
		let cache = Arc::new(TokenCache::new(Arc::new(exchanger), config.cache));
		let pool = Pool::new(connector, config.database, config.pool);
		let facade = Self::new(cache, pool);

		Ok(match config.query_timeout {
			Some(timeout) => facade.with_query_timeout(timeout),
			None => facade,
		})
	}

	/// Bounds every statement by `timeout`.
	pub fn with_query_timeout(mut self, timeout: StdDuration) -> Self {
		self.query_timeout = Some(timeout);

		self
	}

	/// Token cache in use.
	pub fn cache(&self) -> &Arc<TokenCache> {
		&self.cache
	}

	/// Connection pool in use.
	pub fn pool(&self) -> &Pool {
		&self.pool
	}

	/// Runs `statement` for `subject`, binding `params` positionally.
	pub async fn run_query(
		&self,
		subject: &SubjectId,
		assertion: &UserAssertion,
		statement: &str,
		params: &[SqlValue],
	) -> Result<ResultSet> {
		self.run_statement(
			subject,
			assertion,
			&Statement::new(statement).with_params(params.iter().cloned()),
		)
		.await
	}

	/// Runs a prepared [`Statement`] for `subject`.
	pub async fn run_statement(
		&self,
		subject: &SubjectId,
		assertion: &UserAssertion,
		statement: &Statement,
	) -> Result<ResultSet> {
		let span = OperationSpan::new(KIND, "run_query").with_subject(subject);

		obs::record_operation_outcome(KIND, OperationOutcome::Attempt);

		let result = span.instrument(self.run(subject, assertion, statement)).await;

		obs::record_operation_outcome(KIND, OperationOutcome::of(&result));

		result
	}

	/// Ends the subject's session: drops the cached token and closes free connections.
	pub async fn end_session(&self, subject: &SubjectId) {
		self.cache.evict(subject);

		let closed = self.pool.purge_subject(subject).await;

		obs::debug_event(KIND, &format!("session ended; closed {closed} free connection(s)"));
	}

	/// Starts the pool reaper and the token cache idle sweep.
	pub fn spawn_maintenance(&self) -> Maintenance {
		Maintenance { reaper: self.pool.spawn_reaper(), sweeper: self.cache.spawn_sweeper() }
	}

	async fn run(
		&self,
		subject: &SubjectId,
		assertion: &UserAssertion,
		statement: &Statement,
	) -> Result<ResultSet> {
		let token = self.cache.get_token(subject, assertion).await?;
		let mut conn = match self.pool.acquire(subject, &token).await {
			Err(Error::ConnectionUnavailable(err)) if err.is_retryable() => {
				obs::warn_event(KIND, &format!("retrying connection acquisition once: {err}"));

				self.pool.acquire(subject, &token).await?
			},
			acquired => acquired?,
		};
		let executed = self.execute(&mut conn, statement).await;

		self.pool.release(conn).await;

		executed
	}

	async fn execute(&self, conn: &mut PooledConnection, statement: &Statement) -> Result<ResultSet> {
		let executed = match self.query_timeout {
			Some(limit) => {
				let outcome = tokio_time::timeout(limit, conn.execute(statement)).await;

				match outcome {
					Ok(executed) => executed,
					Err(_) => {
						// The statement may still be running server-side.
						conn.mark_invalid();

						return Err(Error::TimedOut { operation: "query", after: limit });
					},
				}
			},
			None => conn.execute(statement).await,
		};

		executed.map_err(|source| {
			if source.kind.poisons_connection() {
				conn.mark_invalid();
			}

			Error::QueryFailed { diagnostic: source.message.clone(), source }
		})
	}
}

/// Background maintenance tasks started by [`QueryFacade::spawn_maintenance`].
#[derive(Debug)]
pub struct Maintenance {
	reaper: JoinHandle<()>,
	sweeper: JoinHandle<()>,
}
impl Maintenance {
	/// Stops both tasks.
	pub fn shutdown(self) {
		self.reaper.abort();
		self.sweeper.abort();
	}
}
