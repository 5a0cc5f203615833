//! In-process driver used by tests and demos.
//!
//! Statements are answered by a programmable handler; every opened connection is recorded
//! with its subject and token fingerprint so tests can audit which identity touched the
//! database.

// std
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
// self
use crate::{
	_prelude::*,
	auth::{SubjectId, TokenFingerprint},
	db::{
		CloseFuture, ConnectFuture, ConnectParams, DatabaseConnection, DatabaseConnector,
		DriverError, DriverErrorKind, ExecuteFuture, ResultSet, SqlValue, Statement,
	},
};

/// Answers statements for a subject.
pub type StatementHandler =
	Arc<dyn Fn(&SubjectId, &Statement) -> Result<ResultSet, DriverError> + Send + Sync>;

/// Audit record of one opened connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectRecord {
	/// Connection identifier assigned by the driver.
	pub connection_id: u64,
	/// Subject the connection was authenticated for.
	pub subject: SubjectId,
	/// Fingerprint of the token presented at connect time.
	pub fingerprint: TokenFingerprint,
}

/// Audit record of one executed statement.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecuteRecord {
	/// Connection that ran the statement.
	pub connection_id: u64,
	/// Subject the connection is authenticated for.
	pub subject: SubjectId,
	/// Statement as received, parameters included.
	pub statement: Statement,
}

/// [`DatabaseConnector`] backed by process memory.
#[derive(Clone)]
pub struct MemoryConnector {
	state: Arc<MemoryState>,
}
impl MemoryConnector {
	/// Creates a driver answering `SELECT 1` and rejecting anything else.
	pub fn new() -> Self {
		Self::with_handler(default_handler)
	}

	/// Creates a driver answering statements with `handler`.
	pub fn with_handler<F>(handler: F) -> Self
	where
		F: 'static + Fn(&SubjectId, &Statement) -> Result<ResultSet, DriverError> + Send + Sync,
	{
		Self {
			state: Arc::new(MemoryState {
				handler: RwLock::new(Arc::new(handler)),
				connect_failures: Mutex::new(VecDeque::new()),
				connect_delay: Mutex::new(StdDuration::ZERO),
				execute_delay: Mutex::new(StdDuration::ZERO),
				connects: Mutex::new(Vec::new()),
				executions: Mutex::new(Vec::new()),
				next_id: AtomicU64::new(1),
				open: AtomicUsize::new(0),
				closed: AtomicUsize::new(0),
				generation: AtomicU64::new(0),
			}),
		}
	}

	/// Replaces the statement handler for subsequent statements.
	pub fn set_handler<F>(&self, handler: F)
	where
		F: 'static + Fn(&SubjectId, &Statement) -> Result<ResultSet, DriverError> + Send + Sync,
	{
		*self.state.handler.write() = Arc::new(handler);
	}

	/// Makes the next connect attempt fail with `error`. Queued failures are consumed in order.
	pub fn fail_next_connect(&self, error: DriverError) {
		self.state.connect_failures.lock().push_back(error);
	}

	/// Delays every connect attempt.
	pub fn set_connect_delay(&self, delay: StdDuration) {
		*self.state.connect_delay.lock() = delay;
	}

	/// Delays every statement.
	pub fn set_execute_delay(&self, delay: StdDuration) {
		*self.state.execute_delay.lock() = delay;
	}

	/// Marks every connection opened so far as broken.
	pub fn break_connections(&self) {
		self.state.generation.fetch_add(1, Ordering::SeqCst);
	}

	/// Connections opened so far, oldest first.
	pub fn connects(&self) -> Vec<ConnectRecord> {
		self.state.connects.lock().clone()
	}

	/// Statements executed so far, oldest first.
	pub fn executions(&self) -> Vec<ExecuteRecord> {
		self.state.executions.lock().clone()
	}

	/// Connections currently open.
	pub fn open_connections(&self) -> usize {
		self.state.open.load(Ordering::SeqCst)
	}

	/// Connections closed so far.
	pub fn closed_connections(&self) -> usize {
		self.state.closed.load(Ordering::SeqCst)
	}
}
impl Default for MemoryConnector {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for MemoryConnector {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MemoryConnector")
			.field("open", &self.open_connections())
			.field("closed", &self.closed_connections())
			.finish()
	}
}
impl DatabaseConnector for MemoryConnector {
	fn connect<'a>(&'a self, params: &'a ConnectParams) -> ConnectFuture<'a> {
		Box::pin(async move {
			let delay = *self.state.connect_delay.lock();

			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}

			let failure = self.state.connect_failures.lock().pop_front();

			if let Some(err) = failure {
				return Err(err);
			}
			if params.access_token.is_blank() {
				return Err(DriverError::new(
					DriverErrorKind::Authentication,
					"Login failed: no access token was presented.",
				)
				.with_code(18456));
			}

			let connection_id = self.state.next_id.fetch_add(1, Ordering::SeqCst);

			self.state.connects.lock().push(ConnectRecord {
				connection_id,
				subject: params.subject.clone(),
				fingerprint: params.token_fingerprint.clone(),
			});
			self.state.open.fetch_add(1, Ordering::SeqCst);

			Ok(Box::new(MemoryConnection {
				id: connection_id,
				subject: params.subject.clone(),
				generation: self.state.generation.load(Ordering::SeqCst),
				poisoned: AtomicBool::new(false),
				state: self.state.clone(),
			}) as Box<dyn DatabaseConnection>)
		})
	}
}

struct MemoryState {
	handler: RwLock<StatementHandler>,
	connect_failures: Mutex<VecDeque<DriverError>>,
	connect_delay: Mutex<StdDuration>,
	execute_delay: Mutex<StdDuration>,
	connects: Mutex<Vec<ConnectRecord>>,
	executions: Mutex<Vec<ExecuteRecord>>,
	next_id: AtomicU64,
	open: AtomicUsize,
	closed: AtomicUsize,
	generation: AtomicU64,
}

struct MemoryConnection {
	id: u64,
	subject: SubjectId,
	generation: u64,
	poisoned: AtomicBool,
	state: Arc<MemoryState>,
}
impl DatabaseConnection for MemoryConnection {
	fn execute<'a>(&'a mut self, statement: &'a Statement) -> ExecuteFuture<'a> {
		Box::pin(async move {
			let delay = *self.state.execute_delay.lock();

			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}
			if !self.is_healthy() {
				return Err(DriverError::new(
					DriverErrorKind::Network,
					"Communication link failure.",
				));
			}

			self.state.executions.lock().push(ExecuteRecord {
				connection_id: self.id,
				subject: self.subject.clone(),
				statement: statement.clone(),
			});

			let handler = self.state.handler.read().clone();
			let result = handler(&self.subject, statement);

			if let Err(err) = &result
				&& err.kind.poisons_connection()
			{
				self.poisoned.store(true, Ordering::SeqCst);
			}

			result
		})
	}

	fn is_healthy(&self) -> bool {
		!self.poisoned.load(Ordering::SeqCst)
			&& self.generation == self.state.generation.load(Ordering::SeqCst)
	}

	fn close(self: Box<Self>) -> CloseFuture {
		self.state.open.fetch_sub(1, Ordering::SeqCst);
		self.state.closed.fetch_add(1, Ordering::SeqCst);

		Box::pin(async {})
	}
}

fn default_handler(_: &SubjectId, statement: &Statement) -> Result<ResultSet, DriverError> {
	let text = statement.text.trim().trim_end_matches(';');

	if text.eq_ignore_ascii_case("SELECT 1") {
		return Ok(ResultSet::with_columns([""]).push_row(vec![SqlValue::Int(1)]));
	}

	Err(DriverError::new(
		DriverErrorKind::Statement,
		format!("Statement `{text}` is not supported by the in-memory driver."),
	))
}
