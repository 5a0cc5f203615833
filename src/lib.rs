//! On-Behalf-Of authenticated database access: exchange signed-in users' assertions for
//! database-scoped tokens, cache them per subject, and lease subject-bound pooled
//! connections without ever crossing identities.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod credential;
pub mod db;
pub mod error;
pub mod exchange;
pub mod facade;
pub mod http;
pub mod obs;
pub mod pool;
pub mod provider;

mod shard;

#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
	// self
	use crate::{
		auth::{ClientId, DelegatedToken, ResourceScope, SubjectId, UserAssertion},
		exchange::{ExchangeFuture, TokenExchange},
	};
	#[cfg(feature = "reqwest")]
	use crate::{
		credential::CredentialStore,
		exchange::{OboExchanger, ReqwestTransportErrorMapper, RetryPolicy},
		http::ReqwestHttpClient,
		provider::{DefaultProviderStrategy, ProviderDescriptor, ProviderStrategy},
	};

	/// Client identifier shared by test fixtures.
	pub const TEST_CLIENT_ID: &str = "11111111-2222-3333-4444-555555555555";
	/// Issuer accepted by test descriptors.
	pub const TEST_ISSUER: &str = "https://login.example.com/tenant-test/v2.0";
	/// Resource scope used by test descriptors.
	pub const TEST_SCOPE: &str = "https://database.example.net//.default";

	/// Exchanger type alias used by reqwest-backed integration tests.
	#[cfg(feature = "reqwest")]
	pub type ReqwestTestExchanger = OboExchanger<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	#[cfg(feature = "reqwest")]
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Constructs an [`OboExchanger`] against the provided descriptor using a fast retry policy
	/// and the reqwest transport used across integration tests.
	#[cfg(feature = "reqwest")]
	pub fn build_reqwest_test_exchanger(
		descriptor: ProviderDescriptor,
		client_secret: &str,
	) -> ReqwestTestExchanger {
		let client_id = ClientId::new(TEST_CLIENT_ID).expect("Test client identifier is valid.");
		let credentials = CredentialStore::with_secret(client_id, client_secret);
		let strategy: Arc<dyn ProviderStrategy> = Arc::new(DefaultProviderStrategy);
		let retry = RetryPolicy::default()
			.with_base_delay(StdDuration::from_millis(5))
			.with_max_delay(StdDuration::from_millis(20));

		OboExchanger::with_http_client(
			descriptor,
			credentials,
			strategy,
			test_reqwest_http_client(),
			ReqwestTransportErrorMapper,
		)
		.with_retry_policy(retry)
	}

	/// Builds an unsigned JWT-shaped assertion carrying the provided claims.
	pub fn unsigned_jwt(claims: &serde_json::Value) -> String {
		// crates.io
		use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

		let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
		let payload = URL_SAFE_NO_PAD.encode(claims.to_string());

		format!("{header}.{payload}.c2lnbmF0dXJl")
	}

	/// Returns a valid assertion for `subject` that expires in one hour.
	pub fn test_assertion(subject: &str) -> UserAssertion {
		UserAssertion::new(
			SubjectId::new(subject).expect("Test subject identifier is valid."),
			format!("assertion-for-{subject}"),
			TEST_CLIENT_ID,
			TEST_ISSUER,
			OffsetDateTime::now_utc() + Duration::hours(1),
		)
	}

	/// Returns the resource scope used across tests.
	pub fn test_scope() -> ResourceScope {
		ResourceScope::new(TEST_SCOPE).expect("Test scope is valid.")
	}

	/// In-process [`TokenExchange`] that mints deterministic tokens and counts calls.
	#[derive(Debug)]
	pub struct CountingExchanger {
		calls: AtomicUsize,
		generation: AtomicU64,
		lifetime: Mutex<Duration>,
		delay: StdDuration,
		failure: Mutex<Option<Error>>,
	}
	impl CountingExchanger {
		/// Creates an exchanger issuing tokens valid for `lifetime`.
		pub fn new(lifetime: Duration) -> Self {
			Self {
				calls: AtomicUsize::new(0),
				generation: AtomicU64::new(0),
				lifetime: Mutex::new(lifetime),
				delay: StdDuration::ZERO,
				failure: Mutex::new(None),
			}
		}

		/// Delays every exchange by `delay` so callers can overlap.
		pub fn with_delay(mut self, delay: StdDuration) -> Self {
			self.delay = delay;

			self
		}

		/// Number of exchanges performed so far.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}

		/// Changes the lifetime of subsequently issued tokens.
		pub fn set_lifetime(&self, lifetime: Duration) {
			*self.lifetime.lock() = lifetime;
		}

		/// Makes every subsequent exchange fail with `error` (or succeed again with `None`).
		pub fn fail_with(&self, error: Option<Error>) {
			*self.failure.lock() = error;
		}
	}
	impl TokenExchange for CountingExchanger {
		fn exchange<'a>(&'a self, assertion: &'a UserAssertion) -> ExchangeFuture<'a> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);

				if !self.delay.is_zero() {
					tokio::time::sleep(self.delay).await;
				}
				if let Some(err) = self.failure.lock().clone() {
					return Err(err);
				}

				let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
				let lifetime = *self.lifetime.lock();

				DelegatedToken::builder(assertion.subject().clone(), test_scope())
					.access_token(format!("db-token-{}-{generation}", assertion.subject()))
					.issued_now()
					.expires_in(lifetime)
					.build()
					.map_err(|err| crate::error::ConfigError::from(err).into())
			})
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, VecDeque, hash_map::DefaultHasher},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::{Hash, Hasher},
		pin::Pin,
		str::FromStr,
		sync::{Arc, Weak},
		time::{Duration as StdDuration, Instant},
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use oauth2;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
