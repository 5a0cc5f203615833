//! On-Behalf-Of token exchange against the provider's token endpoint.
//!
//! [`OboExchanger`] validates the inbound assertion locally, posts the jwt-bearer grant
//! with `requested_token_use=on_behalf_of` for the configured resource scope, and turns
//! the response into a [`DelegatedToken`]. Transient failures are retried under a
//! [`RetryPolicy`]; everything else surfaces immediately.
//!
//! The [`TokenExchange`] trait is the seam the token cache depends on, so caches can be
//! exercised without a provider.

mod metrics;
mod request;
mod response;
mod retry;
mod transport;

pub use metrics::*;
pub use request::*;
pub use response::*;
pub use retry::*;
pub use transport::*;

// crates.io
use oauth2::AsyncHttpClient;
use tokio::time::{self as tokio_time, Instant as TokioInstant};
// self
use crate::{
	_prelude::*,
	auth::{AssertionPolicy, DelegatedToken, UserAssertion},
	credential::CredentialStore,
	error::TransientError,
	http::{ResponseMetadataSlot, TokenHttpClient},
	obs::{self, OperationKind, OperationOutcome, OperationSpan},
	provider::{ProviderDescriptor, ProviderStrategy},
};
#[cfg(feature = "reqwest")]
use crate::{error::ConfigError, http::ReqwestHttpClient, provider::DefaultProviderStrategy};

const KIND: OperationKind = OperationKind::Exchange;

/// Boxed future returned by [`TokenExchange::exchange`].
pub type ExchangeFuture<'a> = Pin<Box<dyn Future<Output = Result<DelegatedToken>> + 'a + Send>>;

#[cfg(feature = "reqwest")]
/// Exchanger specialized for the crate's default reqwest transport stack.
pub type ReqwestOboExchanger = OboExchanger<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Exchanges a user assertion for a token scoped to the configured database resource.
pub trait TokenExchange
where
	Self: Send + Sync,
{
	/// Performs one logical exchange (retries included) for the assertion's subject.
	fn exchange<'a>(&'a self, assertion: &'a UserAssertion) -> ExchangeFuture<'a>;
}

/// Provider-backed [`TokenExchange`] implementation.
#[derive(Clone)]
pub struct OboExchanger<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http_client: Arc<C>,
	transport_mapper: Arc<M>,
	descriptor: ProviderDescriptor,
	credentials: Arc<CredentialStore>,
	strategy: Arc<dyn ProviderStrategy>,
	assertion_policy: AssertionPolicy,
	retry: RetryPolicy,
	metrics: Arc<ExchangeMetrics>,
}
impl<C, M> OboExchanger<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates an exchanger that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		descriptor: ProviderDescriptor,
		credentials: CredentialStore,
		strategy: Arc<dyn ProviderStrategy>,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		let assertion_policy = descriptor.extra_audiences.iter().fold(
			AssertionPolicy::new(credentials.client_id(), descriptor.trusted_issuers.iter().cloned()),
			|policy, audience| policy.with_audience(audience.clone()),
		);

		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			descriptor,
			credentials: Arc::new(credentials),
			strategy,
			assertion_policy,
			retry: RetryPolicy::default(),
			metrics: Default::default(),
		}
	}

	/// Replaces the retry policy.
	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Descriptor the exchanger targets.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	/// Retry policy in effect.
	pub fn retry_policy(&self) -> &RetryPolicy {
		&self.retry
	}

	/// Shared exchange counters.
	pub fn metrics(&self) -> &Arc<ExchangeMetrics> {
		&self.metrics
	}

	async fn exchange_with_retry(&self, assertion: &UserAssertion) -> Result<DelegatedToken> {
		self.assertion_policy.check(assertion, OffsetDateTime::now_utc())?;

		if self.credentials.is_blank() {
			return Err(Error::InvalidClient { reason: "the client credential is blank".into() });
		}

		let started = TokioInstant::now();
		let deadline = self.retry.deadline;
		let mut attempt = 0;

		loop {
			attempt += 1;

			let remaining = deadline.saturating_sub(started.elapsed());
			let Ok(outcome) = tokio_time::timeout(remaining, self.exchange_once(assertion)).await
			else {
				return Err(TransientError::DeadlineExceeded { attempts: attempt, deadline }.into());
			};

			match outcome {
				Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
					let hint = match &err {
						Error::ProviderUnavailable(transient) => transient.retry_after(),
						_ => None,
					};
					let delay = self.retry.delay_after(attempt, hint);

					if started.elapsed() + delay >= deadline {
						return Err(
							TransientError::DeadlineExceeded { attempts: attempt, deadline }.into()
						);
					}

					obs::warn_event(KIND, &format!("retrying after transient failure: {err}"));
					tokio_time::sleep(delay).await;
				},
				outcome => return outcome,
			}
		}
	}

	async fn exchange_once(&self, assertion: &UserAssertion) -> Result<DelegatedToken> {
		let request = build_obo_request(
			&self.descriptor,
			&self.credentials,
			self.strategy.as_ref(),
			assertion,
		)?;
		let slot = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(slot.clone());

		self.metrics.record_provider_call();

		let response = handle
			.call(request)
			.await
			.map_err(|err| self.transport_mapper.map_transport_error(slot.take().as_ref(), err))?;

		map_token_response(
			self.strategy.as_ref(),
			assertion.subject(),
			&self.descriptor.resource_scope,
			slot.take().as_ref(),
			response,
		)
	}
}
#[cfg(feature = "reqwest")]
impl OboExchanger<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates an exchanger with its own reqwest transport and the default strategy.
	pub fn new(
		descriptor: ProviderDescriptor,
		credentials: CredentialStore,
	) -> Result<Self, ConfigError> {
		Ok(Self::with_http_client(
			descriptor,
			credentials,
			Arc::new(DefaultProviderStrategy),
			ReqwestHttpClient::new()?,
			ReqwestTransportErrorMapper,
		))
	}
}
impl<C, M> TokenExchange for OboExchanger<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn exchange<'a>(&'a self, assertion: &'a UserAssertion) -> ExchangeFuture<'a> {
		let span = OperationSpan::new(KIND, "exchange").with_subject(assertion.subject());

		Box::pin(span.instrument(async move {
			obs::record_operation_outcome(KIND, OperationOutcome::Attempt);
			self.metrics.record_attempt();

			let result = self.exchange_with_retry(assertion).await;

			match &result {
				Ok(_) => self.metrics.record_success(),
				Err(_) => self.metrics.record_failure(),
			}

			obs::record_operation_outcome(KIND, OperationOutcome::of(&result));

			result
		}))
	}
}
impl<C, M> Debug for OboExchanger<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OboExchanger")
			.field("descriptor", &self.descriptor)
			.field("client_id", self.credentials.client_id())
			.field("retry", &self.retry)
			.finish()
	}
}
