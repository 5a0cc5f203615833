//! On-Behalf-Of token request construction.

// crates.io
use oauth2::{
	HttpRequest,
	http::{
		Method, Request,
		header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
	},
};
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::UserAssertion,
	credential::CredentialStore,
	error::ConfigError,
	provider::{ProviderDescriptor, ProviderStrategy},
};

/// `grant_type` of the On-Behalf-Of flow.
pub const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// `requested_token_use` value selecting the On-Behalf-Of flow.
pub const REQUESTED_TOKEN_USE_OBO: &str = "on_behalf_of";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Form fields of an exchange, before client authentication is applied.
pub fn obo_form(
	descriptor: &ProviderDescriptor,
	strategy: &dyn ProviderStrategy,
	assertion: &UserAssertion,
) -> BTreeMap<String, String> {
	let mut form = BTreeMap::new();

	strategy.augment_token_request(&mut form);
	form.insert("grant_type".into(), GRANT_TYPE_JWT_BEARER.into());
	form.insert("assertion".into(), assertion.token().expose().to_owned());
	form.insert("requested_token_use".into(), REQUESTED_TOKEN_USE_OBO.into());
	form.insert("scope".into(), descriptor.resource_scope.as_str().to_owned());

	form
}

/// Builds the complete HTTP request for one exchange attempt.
pub fn build_obo_request(
	descriptor: &ProviderDescriptor,
	credentials: &CredentialStore,
	strategy: &dyn ProviderStrategy,
	assertion: &UserAssertion,
) -> Result<HttpRequest, ConfigError> {
	let mut form = obo_form(descriptor, strategy, assertion);
	let authorization = credentials.authenticate(descriptor.preferred_client_auth_method, &mut form);
	let body = form_urlencoded::Serializer::new(String::new()).extend_pairs(form.iter()).finish();
	let mut builder = Request::builder()
		.method(Method::POST)
		.uri(descriptor.token_endpoint.as_str())
		.header(CONTENT_TYPE, FORM_CONTENT_TYPE)
		.header(ACCEPT, "application/json");

	if let Some(value) = authorization {
		builder = builder.header(AUTHORIZATION, value);
	}

	Ok(builder.body(body.into_bytes())?)
}
