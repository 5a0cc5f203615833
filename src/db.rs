//! Database driver seam: the traits the pool drives, the values statements bind, and an
//! in-memory driver.
//!
//! Concrete wire drivers live outside the crate; they implement [`DatabaseConnector`] and
//! authenticate with the token carried by [`ConnectParams`].

pub mod memory;
pub mod params;
pub mod value;

pub use memory::*;
pub use params::*;
pub use value::*;

// self
use crate::_prelude::*;

/// Boxed future returned by [`DatabaseConnector::connect`].
pub type ConnectFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Box<dyn DatabaseConnection>, DriverError>> + 'a + Send>>;
/// Boxed future returned by [`DatabaseConnection::execute`].
pub type ExecuteFuture<'a> = Pin<Box<dyn Future<Output = Result<ResultSet, DriverError>> + 'a + Send>>;
/// Boxed future returned by [`DatabaseConnection::close`].
pub type CloseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Opens token-authenticated database connections.
pub trait DatabaseConnector
where
	Self: Send + Sync,
{
	/// Opens one connection authenticated with `params.access_token`.
	fn connect<'a>(&'a self, params: &'a ConnectParams) -> ConnectFuture<'a>;
}

/// Live driver connection.
pub trait DatabaseConnection
where
	Self: Send,
{
	/// Executes a statement with its parameters bound positionally.
	fn execute<'a>(&'a mut self, statement: &'a Statement) -> ExecuteFuture<'a>;

	/// Returns `false` once the connection can no longer serve statements.
	fn is_healthy(&self) -> bool;

	/// Closes the connection.
	fn close(self: Box<Self>) -> CloseFuture;
}

/// Broad driver failure classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DriverErrorKind {
	/// Transport failure; the connection is unusable.
	Network,
	/// The server rejected the access token.
	Authentication,
	/// The statement itself failed (syntax, permissions, constraint).
	Statement,
	/// Anything else.
	Other,
}
impl DriverErrorKind {
	/// Returns `true` when the connection must not be reused after this failure.
	pub fn poisons_connection(self) -> bool {
		matches!(self, Self::Network | Self::Authentication)
	}
}

/// Failure reported by a database driver.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("{message}")]
pub struct DriverError {
	/// Failure class.
	pub kind: DriverErrorKind,
	/// Driver diagnostic.
	pub message: String,
	/// Native server error number, when one was reported.
	pub code: Option<i32>,
}
impl DriverError {
	/// Creates a driver error without a native code.
	pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
		Self { kind, message: message.into(), code: None }
	}

	/// Attaches the server's native error number.
	pub fn with_code(mut self, code: i32) -> Self {
		self.code = Some(code);

		self
	}
}
