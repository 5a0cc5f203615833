//! Mapping of transport-level failures into the crate taxonomy.

// crates.io
use oauth2::HttpClientError;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransientError},
	http::ResponseMetadata,
};

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a crate error.
	fn map_transport_error(&self, metadata: Option<&ResponseMetadata>, error: HttpClientError<E>)
	-> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransientError::from(inner).into(),
			HttpClientError::Other(message) => map_generic_transport_error(meta, message),
			_ => map_generic_transport_error(meta, "unrecognized transport failure"),
		}
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(meta: Option<&ResponseMetadata>, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::TokenEndpoint {
			message: "request timed out while calling the token endpoint".into(),
			status: meta.and_then(|m| m.status).or_else(|| err.status().map(|s| s.as_u16())),
			retry_after: meta.and_then(|m| m.retry_after),
		}
		.into();
	}

	TransientError::from(err).into()
}

/// Fallback mapping for transport failures that carry only a message.
pub fn map_generic_transport_error(meta: Option<&ResponseMetadata>, message: impl Display) -> Error {
	TransientError::TokenEndpoint {
		message: format!("HTTP client error while calling the token endpoint: {message}"),
		status: meta.and_then(|m| m.status),
		retry_after: meta.and_then(|m| m.retry_after),
	}
	.into()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn generic_failures_are_transient_and_keep_hints() {
		let meta = ResponseMetadata { status: Some(503), retry_after: Some(Duration::seconds(2)) };
		let err = map_generic_transport_error(Some(&meta), "connection reset");

		assert!(err.is_retryable());

		let Error::ProviderUnavailable(transient) = err else {
			panic!("Generic transport failures should be transient.");
		};

		assert_eq!(transient.retry_after(), Some(Duration::seconds(2)));
	}

	#[cfg(feature = "reqwest")]
	#[test]
	fn io_failures_map_to_network_errors() {
		let err = ReqwestTransportErrorMapper.map_transport_error(
			None,
			HttpClientError::Io(std::io::Error::other("socket closed")),
		);

		assert!(matches!(err, Error::ProviderUnavailable(TransientError::Network { .. })));
	}
}
