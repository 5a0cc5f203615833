// std
use std::iter::IntoIterator;
// self
use crate::{
	_prelude::*,
	auth::{ProviderId, ResourceScope},
	provider::{ClientAuthMethod, ProviderDescriptor},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ProviderDescriptorError {
	/// Token endpoint is mandatory.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// Every descriptor targets exactly one resource scope.
	#[error("Missing resource scope.")]
	MissingResourceScope,
	/// Inbound assertions can only be accepted from an explicit issuer list.
	#[error("Descriptor must trust at least one issuer.")]
	NoTrustedIssuers,
	/// Endpoints must use HTTPS.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Tenant identifiers must be a bare GUID or domain name.
	#[error("Tenant `{tenant}` is not a valid directory identifier.")]
	InvalidTenant {
		/// Tenant value that failed validation.
		tenant: String,
	},
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	/// Identifier for the descriptor being constructed.
	pub id: ProviderId,
	/// Token endpoint receiving exchanges.
	pub token_endpoint: Option<Url>,
	/// Database resource scope.
	pub resource_scope: Option<ResourceScope>,
	/// Issuers accepted on inbound assertions.
	pub trusted_issuers: Vec<String>,
	/// Additional accepted audiences.
	pub extra_audiences: Vec<String>,
	/// Preferred client authentication method for the token endpoint.
	pub preferred_client_auth_method: ClientAuthMethod,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder seeded with the provided identifier.
	pub fn new(id: ProviderId) -> Self {
		Self {
			id,
			token_endpoint: None,
			resource_scope: None,
			trusted_issuers: Vec::new(),
			extra_audiences: Vec::new(),
			preferred_client_auth_method: ClientAuthMethod::default(),
		}
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the database resource scope.
	pub fn resource_scope(mut self, scope: ResourceScope) -> Self {
		self.resource_scope = Some(scope);

		self
	}

	/// Trusts a single issuer.
	pub fn trusted_issuer(mut self, issuer: impl Into<String>) -> Self {
		self.trusted_issuers.push(issuer.into());

		self
	}

	/// Trusts multiple issuers.
	pub fn trusted_issuers<I, S>(mut self, issuers: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.trusted_issuers.extend(issuers.into_iter().map(Into::into));

		self
	}

	/// Accepts an additional assertion audience.
	pub fn extra_audience(mut self, audience: impl Into<String>) -> Self {
		self.extra_audiences.push(audience.into());

		self
	}

	/// Overrides the preferred client authentication method.
	pub fn preferred_client_auth_method(mut self, method: ClientAuthMethod) -> Self {
		self.preferred_client_auth_method = method;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let token_endpoint =
			self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;
		let resource_scope =
			self.resource_scope.ok_or(ProviderDescriptorError::MissingResourceScope)?;
		let descriptor = ProviderDescriptor {
			id: self.id,
			token_endpoint,
			resource_scope,
			trusted_issuers: self.trusted_issuers,
			extra_audiences: self.extra_audiences,
			preferred_client_auth_method: self.preferred_client_auth_method,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	/// Validates invariants for the descriptor.
	fn validate(&self) -> Result<(), ProviderDescriptorError> {
		if self.trusted_issuers.iter().all(|issuer| issuer.trim().is_empty()) {
			return Err(ProviderDescriptorError::NoTrustedIssuers);
		}

		validate_endpoint("token", &self.token_endpoint)
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	if url.scheme() != "https" {
		Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	} else {
		Ok(())
	}
}
