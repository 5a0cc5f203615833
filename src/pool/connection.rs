//! Leased connection guard and the token binding it carries.

// std
use std::sync::atomic::Ordering;
// crates.io
use tokio::runtime::Handle;
// self
use crate::{
	_prelude::*,
	auth::{DelegatedToken, SubjectId, TokenFingerprint},
	db::{DatabaseConnection, DriverError, DriverErrorKind, ResultSet, Statement},
	pool::PoolShared,
};

/// Identity and token generation a connection was authenticated with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionBinding {
	/// Subject the connection is authenticated for.
	pub subject: SubjectId,
	/// Fingerprint of the token presented at connect time.
	pub fingerprint: TokenFingerprint,
	/// Issue instant of that token.
	pub issued_at: OffsetDateTime,
	/// Expiry of that token.
	pub expires_at: OffsetDateTime,
}
impl ConnectionBinding {
	/// Binding for a connection opened with `token`.
	pub fn of(token: &DelegatedToken) -> Self {
		Self {
			subject: token.subject().clone(),
			fingerprint: token.fingerprint().clone(),
			issued_at: token.issued_at(),
			expires_at: token.expires_at(),
		}
	}

	/// Returns `true` once the bound token has expired.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at <= instant
	}

	/// Whether a free connection with this binding may serve a caller holding `token`.
	///
	/// The bound token must still be valid and no older than `token`. The subject is
	/// checked separately so that a mismatch is reported, not skipped.
	pub fn can_serve(&self, token: &DelegatedToken, instant: OffsetDateTime) -> bool {
		!self.is_expired_at(instant)
			&& (self.fingerprint == *token.fingerprint() || self.issued_at >= token.issued_at())
	}
}

/// Connection leased to exactly one caller.
///
/// Hand it back with [`Pool::release`](crate::pool::Pool::release). Dropping it instead
/// closes the connection and frees its slot.
pub struct PooledConnection {
	pub(super) pool: Arc<PoolShared>,
	pub(super) id: u64,
	pub(super) binding: ConnectionBinding,
	pub(super) conn: Option<Box<dyn DatabaseConnection>>,
	pub(super) invalid: bool,
}
impl PooledConnection {
	pub(super) fn new(
		pool: Arc<PoolShared>,
		id: u64,
		binding: ConnectionBinding,
		conn: Box<dyn DatabaseConnection>,
	) -> Self {
		Self { pool, id, binding, conn: Some(conn), invalid: false }
	}

	/// Pool-assigned connection identifier.
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Subject the connection is authenticated for.
	pub fn subject(&self) -> &SubjectId {
		&self.binding.subject
	}

	/// Token binding of the connection.
	pub fn binding(&self) -> &ConnectionBinding {
		&self.binding
	}

	/// Executes a statement on the leased connection.
	///
	/// Network and authentication failures mark the connection invalid so release closes it.
	pub async fn execute(&mut self, statement: &Statement) -> Result<ResultSet, DriverError> {
		let Some(conn) = self.conn.as_mut() else {
			return Err(DriverError::new(DriverErrorKind::Other, "Connection was already released."));
		};
		let result = conn.execute(statement).await;

		if let Err(err) = &result
			&& err.kind.poisons_connection()
		{
			self.invalid = true;
		}

		result
	}

	/// Returns `false` once the connection must not go back to the free set.
	pub fn is_healthy(&self) -> bool {
		!self.invalid && self.conn.as_ref().is_some_and(|conn| conn.is_healthy())
	}

	/// Forces release to close the connection.
	pub fn mark_invalid(&mut self) {
		self.invalid = true;
	}
}
impl Drop for PooledConnection {
	fn drop(&mut self) {
		let Some(conn) = self.conn.take() else { return };

		self.pool.forget_lease(&self.binding.subject);
		self.pool.open.fetch_sub(1, Ordering::SeqCst);
		self.pool.metrics.record_closed();
		self.pool.capacity.notify_waiters();

		if let Ok(handle) = Handle::try_current() {
			handle.spawn(conn.close());
		}
	}
}
impl Debug for PooledConnection {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PooledConnection")
			.field("id", &self.id)
			.field("binding", &self.binding)
			.field("invalid", &self.invalid)
			.finish()
	}
}
