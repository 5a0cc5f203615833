//! Crate-level error types shared by the exchanger, token cache, pool, and query facade.
//!
//! Every error is `Clone` so a single exchange outcome can be handed to all callers that
//! waited on it. Underlying sources are shared behind [`Arc`] for that reason.

// self
use crate::{_prelude::*, auth::SubjectId, db::DriverError};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared error source used where the concrete type is not `Clone`.
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Local configuration problem or malformed provider response.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// The caller's user assertion is unusable; never retried.
	#[error(transparent)]
	AssertionInvalid(#[from] AssertionError),
	/// The user has not granted the database scope; user action is required.
	#[error("User consent is required for the database scope: {reason}.")]
	ConsentRequired {
		/// Provider-supplied reason string.
		reason: String,
		/// Claims challenge to forward to the sign-in flow, when supplied.
		claims: Option<String>,
	},
	/// The application's own client credential was rejected.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// The identity provider is temporarily unreachable; retried with backoff.
	#[error(transparent)]
	ProviderUnavailable(#[from] TransientError),
	/// A database connection could not be obtained.
	#[error(transparent)]
	ConnectionUnavailable(#[from] ConnectionError),
	/// The statement failed on the database; not retried.
	#[error("Query failed: {diagnostic}.")]
	QueryFailed {
		/// Driver diagnostic summarizing the failure.
		diagnostic: String,
		/// Underlying driver failure.
		#[source]
		source: DriverError,
	},
	/// A connection or token bound to one subject was offered to another.
	#[error("Credential bound to subject `{bound}` cannot serve subject `{requested}`.")]
	SubjectMismatch {
		/// Subject the connection or token is authenticated for.
		bound: SubjectId,
		/// Subject that requested it.
		requested: SubjectId,
	},
	/// An operation exceeded its configured time budget.
	#[error("The {operation} operation timed out after {after:?}.")]
	TimedOut {
		/// Operation label.
		operation: &'static str,
		/// Budget that elapsed.
		after: StdDuration,
	},
}
impl Error {
	/// Returns `true` for failures that are safe to retry before any statement ran.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::ProviderUnavailable(_) => true,
			Self::ConnectionUnavailable(err) => err.is_retryable(),
			_ => false,
		}
	}
}

/// Configuration and validation failures.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// HTTP request construction failed.
	#[error("Token request could not be constructed.")]
	HttpRequest {
		/// Underlying request builder failure.
		#[source]
		source: SharedError,
	},
	/// Provider descriptor is invalid.
	#[error(transparent)]
	Descriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Identifier failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// Resource scope failed validation.
	#[error(transparent)]
	InvalidScope(#[from] crate::auth::ScopeError),
	/// Delegated token builder validation failed.
	#[error("Unable to build delegated token.")]
	TokenBuild(#[from] crate::auth::DelegatedTokenBuilderError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned an `expires_in` string that is not a number.
	#[error("The expires_in value `{value}` is not a number of seconds.")]
	MalformedExpiresIn {
		/// Raw value returned by the provider.
		value: String,
	},
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Token endpoint granted a scope outside the configured database resource.
	#[error("Token endpoint granted scope `{scope}` outside the configured resource.")]
	ScopeWidened {
		/// Offending scope.
		scope: String,
	},
	/// Required environment variable is missing or empty.
	#[error("Environment variable `{name}` is required.")]
	MissingEnv {
		/// Variable name.
		name: &'static str,
	},
	/// Environment variable could not be parsed.
	#[error("Environment variable `{name}` is invalid: {reason}.")]
	InvalidEnv {
		/// Variable name.
		name: &'static str,
		/// Parse failure summary.
		reason: String,
	},
	/// Pool or cache settings violate an invariant.
	#[error("Invalid setting: {reason}.")]
	InvalidSetting {
		/// Which invariant was violated.
		reason: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}
impl From<oauth2::http::Error> for ConfigError {
	fn from(e: oauth2::http::Error) -> Self {
		Self::HttpRequest { source: Arc::new(e) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Reasons a user assertion is rejected.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AssertionError {
	/// The assertion carried no token.
	#[error("User assertion is empty.")]
	Empty,
	/// The inbound request did not carry the assertion header.
	#[error("Request header `{name}` carrying the user assertion is missing.")]
	MissingHeader {
		/// Expected header name.
		name: &'static str,
	},
	/// The assertion could not be decoded.
	#[error("User assertion is malformed: {reason}.")]
	Malformed {
		/// Decoding failure summary.
		reason: String,
	},
	/// The assertion expired before it could be exchanged.
	#[error("User assertion expired at {expired_at}.")]
	Expired {
		/// Expiry instant carried by the assertion.
		expired_at: OffsetDateTime,
	},
	/// The assertion was not issued for this application.
	#[error("User assertion audience `{audience}` does not match this application.")]
	WrongAudience {
		/// Audience carried by the assertion.
		audience: String,
	},
	/// The assertion was issued by an untrusted authority.
	#[error("User assertion issuer `{issuer}` is not trusted.")]
	UntrustedIssuer {
		/// Issuer carried by the assertion.
		issuer: String,
	},
	/// The assertion belongs to a different subject than the session.
	#[error("User assertion belongs to `{actual}`, not session subject `{expected}`.")]
	SubjectMismatch {
		/// Session subject.
		expected: SubjectId,
		/// Subject carried by the assertion.
		actual: SubjectId,
	},
	/// The identity provider rejected the assertion.
	#[error("Identity provider rejected the user assertion: {reason}.")]
	Rejected {
		/// Provider-supplied reason string.
		reason: String,
	},
}

/// Temporary identity provider failures (safe to retry).
#[derive(Clone, Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint is unavailable: {message}.")]
	TokenEndpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
	/// Retries ran out of their total time budget.
	#[error("Token exchange gave up after {attempts} attempt(s) within {deadline:?}.")]
	DeadlineExceeded {
		/// Attempts performed before giving up.
		attempts: u32,
		/// Total deadline configured for the exchange.
		deadline: StdDuration,
	},
}
impl TransientError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Arc::new(src) }
	}

	/// Retry-After hint supplied by the provider, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::TokenEndpoint { retry_after, .. } => *retry_after,
			_ => None,
		}
	}
}
impl From<std::io::Error> for TransientError {
	fn from(e: std::io::Error) -> Self {
		Self::network(e)
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransientError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Failures to obtain a pooled database connection.
#[derive(Clone, Debug, ThisError)]
pub enum ConnectionError {
	/// The driver could not open a connection.
	#[error("Database connection could not be opened.")]
	Open {
		/// Driver failure.
		#[source]
		source: DriverError,
	},
	/// Opening a connection exceeded the connect timeout.
	#[error("Database connection was not established within {after:?}.")]
	ConnectTimedOut {
		/// Connect timeout that elapsed.
		after: StdDuration,
	},
	/// Every connection is leased and none was released in time.
	#[error("All {max_size} pooled connections stayed leased for {waited:?}.")]
	PoolExhausted {
		/// Configured pool bound.
		max_size: usize,
		/// Time spent waiting for capacity.
		waited: StdDuration,
	},
	/// The pool has been closed.
	#[error("Connection pool is closed.")]
	PoolClosed,
	/// The supplied token expired before a connection could be bound to it.
	#[error("Access token expired at {expired_at}; refresh it before acquiring.")]
	ExpiredToken {
		/// Expiry instant of the offered token.
		expired_at: OffsetDateTime,
	},
}
impl ConnectionError {
	/// Returns `true` when retrying with the same token may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Open { .. } | Self::ConnectTimedOut { .. } | Self::PoolExhausted { .. })
	}
}
