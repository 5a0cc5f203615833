//! Delegated database tokens minted by the On-Behalf-Of exchange, plus their builder.

// self
use crate::{
	_prelude::*,
	auth::{ResourceScope, SubjectId, TokenFingerprint, TokenSecret},
};

/// Lifecycle status of a delegated token at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Token is not yet valid because the issued-at instant is in the future.
	Pending,
	/// Token is valid and outside the refresh margin.
	Active,
	/// Token is still valid but inside the refresh margin.
	RefreshDue,
	/// Token reached its expiry instant.
	Expired,
}

/// Errors produced by [`DelegatedTokenBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum DelegatedTokenBuilderError {
	/// No access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// No expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// The expiry does not come after the issued-at instant.
	#[error("Token expiry must be later than its issued-at instant.")]
	ExpiryBeforeIssue,
	/// The relative expiry lands outside the representable date range.
	#[error("Token expiry is out of range.")]
	ExpiryOutOfRange,
}

/// Short-lived access token scoped to the database resource and bound to one subject.
///
/// Never persisted; held in memory by the token cache until it expires or the subject's
/// session ends.
#[derive(Clone)]
pub struct DelegatedToken {
	subject: SubjectId,
	scope: ResourceScope,
	access_token: TokenSecret,
	fingerprint: TokenFingerprint,
	issued_at: OffsetDateTime,
	expires_at: OffsetDateTime,
}
impl DelegatedToken {
	/// Returns a builder for a token bound to `subject` and `scope`.
	pub fn builder(subject: SubjectId, scope: ResourceScope) -> DelegatedTokenBuilder {
		DelegatedTokenBuilder::new(subject, scope)
	}

	/// Subject this token acts on behalf of.
	pub fn subject(&self) -> &SubjectId {
		&self.subject
	}

	/// Resource scope the token was issued for.
	pub fn scope(&self) -> &ResourceScope {
		&self.scope
	}

	/// Bearer material. Callers must avoid logging it.
	pub fn access_token(&self) -> &TokenSecret {
		&self.access_token
	}

	/// Loggable fingerprint of the access token.
	pub fn fingerprint(&self) -> &TokenFingerprint {
		&self.fingerprint
	}

	/// Issued-at instant.
	pub fn issued_at(&self) -> OffsetDateTime {
		self.issued_at
	}

	/// Expiry instant.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.expires_at
	}

	/// Computes the lifecycle status at `instant` given a refresh margin.
	pub fn status_at(&self, instant: OffsetDateTime, refresh_margin: Duration) -> TokenStatus {
		if instant < self.issued_at {
			return TokenStatus::Pending;
		}
		if instant >= self.expires_at {
			return TokenStatus::Expired;
		}
		if instant.checked_add(refresh_margin).is_none_or(|due| due >= self.expires_at) {
			return TokenStatus::RefreshDue;
		}

		TokenStatus::Active
	}

	/// Returns `true` if the token has expired at `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Returns `true` if the token is expired relative to the current clock.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` when the token expires within `margin` of `instant` (or already has).
	pub fn needs_refresh_at(&self, instant: OffsetDateTime, margin: Duration) -> bool {
		matches!(self.status_at(instant, margin), TokenStatus::RefreshDue | TokenStatus::Expired)
	}

	/// Time left before expiry at `instant`, clamped at zero.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Duration {
		(self.expires_at - instant).max(Duration::ZERO)
	}
}
impl Debug for DelegatedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DelegatedToken")
			.field("subject", &self.subject)
			.field("scope", &self.scope)
			.field("access_token", &"<redacted>")
			.field("fingerprint", &self.fingerprint.to_string())
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`DelegatedToken`].
#[derive(Clone, Debug)]
pub struct DelegatedTokenBuilder {
	subject: SubjectId,
	scope: ResourceScope,
	access_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl DelegatedTokenBuilder {
	fn new(subject: SubjectId, scope: ResourceScope) -> Self {
		Self { subject, scope, access_token: None, issued_at: None, expires_at: None, expires_in: None }
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Stamps `issued_at` with the current clock.
	pub fn issued_now(self) -> Self {
		self.issued_at(OffsetDateTime::now_utc())
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Consumes the builder and produces a [`DelegatedToken`].
	pub fn build(self) -> Result<DelegatedToken, DelegatedTokenBuilderError> {
		let access_token = self
			.access_token
			.filter(|token| !token.is_blank())
			.ok_or(DelegatedTokenBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at
				.checked_add(delta)
				.ok_or(DelegatedTokenBuilderError::ExpiryOutOfRange)?,
			(None, None) => return Err(DelegatedTokenBuilderError::MissingExpiry),
		};

		if expires_at <= issued_at {
			return Err(DelegatedTokenBuilderError::ExpiryBeforeIssue);
		}

		Ok(DelegatedToken {
			subject: self.subject,
			scope: self.scope,
			fingerprint: access_token.fingerprint(),
			access_token,
			issued_at,
			expires_at,
		})
	}
}
