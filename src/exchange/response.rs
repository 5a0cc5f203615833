//! Token endpoint response parsing and error classification.

// crates.io
use oauth2::HttpResponse;
// self
use crate::{
	_prelude::*,
	auth::{DelegatedToken, DelegatedTokenBuilderError, ResourceScope, SubjectId},
	error::{AssertionError, ConfigError, TransientError},
	http::ResponseMetadata,
	provider::{ProviderErrorContext, ProviderErrorKind, ProviderStrategy},
};

#[derive(Debug, Deserialize)]
struct OboTokenResponse {
	access_token: String,
	#[serde(default)]
	expires_in: Option<RawExpiresIn>,
	#[serde(default)]
	scope: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawExpiresIn {
	Number(serde_json::Number),
	Text(String),
}
impl RawExpiresIn {
	fn seconds(&self) -> Result<i64, ConfigError> {
		match self {
			Self::Number(number) => number.as_i64().ok_or(ConfigError::ExpiresInOutOfRange),
			Self::Text(text) => text
				.trim()
				.parse::<i64>()
				.map_err(|_| ConfigError::MalformedExpiresIn { value: text.clone() }),
		}
	}
}

#[derive(Debug, Default, Deserialize)]
struct ProviderErrorBody {
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	error_description: Option<String>,
	#[serde(default)]
	suberror: Option<String>,
	#[serde(default)]
	error_codes: Vec<u64>,
	#[serde(default)]
	claims: Option<String>,
}

/// Maps a token endpoint response into a delegated token for `subject`.
pub fn map_token_response(
	strategy: &dyn ProviderStrategy,
	subject: &SubjectId,
	scope: &ResourceScope,
	meta: Option<&ResponseMetadata>,
	response: HttpResponse,
) -> Result<DelegatedToken> {
	let status = response.status().as_u16();

	if !response.status().is_success() {
		return Err(map_error_response(strategy, status, meta, response.body()));
	}

	let mut de = serde_json::Deserializer::from_slice(response.body());
	let parsed: OboTokenResponse = serde_path_to_error::deserialize(&mut de).map_err(|source| {
		TransientError::TokenResponseParse { source: Arc::new(source), status: Some(status) }
	})?;
	let expires_in = parsed.expires_in.ok_or(ConfigError::MissingExpiresIn)?.seconds()?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	let widened = parsed
		.scope
		.as_deref()
		.and_then(|granted| granted.split_whitespace().find(|value| !scope.covers(value)));

	if let Some(widened) = widened {
		return Err(ConfigError::ScopeWidened { scope: widened.to_owned() }.into());
	}

	DelegatedToken::builder(subject.clone(), scope.clone())
		.access_token(parsed.access_token)
		.issued_now()
		.expires_in(Duration::seconds(expires_in))
		.build()
		.map_err(|err| match err {
			DelegatedTokenBuilderError::ExpiryOutOfRange => ConfigError::ExpiresInOutOfRange.into(),
			err => ConfigError::from(err).into(),
		})
}

fn map_error_response(
	strategy: &dyn ProviderStrategy,
	status: u16,
	meta: Option<&ResponseMetadata>,
	body: &[u8],
) -> Error {
	let parsed = serde_json::from_slice::<ProviderErrorBody>(body).ok();
	let mut ctx = ProviderErrorContext::new().with_http_status(status);
	let mut claims = None;

	match parsed {
		Some(parsed) if parsed.error.is_some() => {
			if let Some(error) = parsed.error {
				ctx = ctx.with_oauth_error(error);
			}
			if let Some(description) = parsed.error_description {
				ctx = ctx.with_error_description(description);
			}
			if let Some(suberror) = parsed.suberror {
				ctx = ctx.with_suberror(suberror);
			}

			ctx = ctx.with_error_codes(parsed.error_codes);
			claims = parsed.claims;
		},
		_ if !body.is_empty() => ctx = ctx.with_body_preview(String::from_utf8_lossy(body)),
		_ => {},
	}

	let reason = ctx.reason();

	match strategy.classify_token_error(&ctx) {
		ProviderErrorKind::InvalidGrant => AssertionError::Rejected { reason }.into(),
		ProviderErrorKind::ConsentRequired => Error::ConsentRequired { reason, claims },
		ProviderErrorKind::InvalidClient => Error::InvalidClient { reason },
		ProviderErrorKind::Transient => TransientError::TokenEndpoint {
			message: reason,
			status: Some(status),
			retry_after: meta.and_then(|m| m.retry_after),
		}
		.into(),
	}
}
