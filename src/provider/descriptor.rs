//! Provider descriptor data structures and presets.

/// Builder API for assembling provider descriptors.
pub mod builder;

pub use builder::*;

// self
use crate::{
	_prelude::*,
	auth::{ProviderId, ResourceScope},
};

const AZURE_AUTHORITY: &str = "https://login.microsoftonline.com";
const AZURE_SQL_SCOPE: &str = "https://database.windows.net//.default";

/// Preferred client authentication modes for token endpoint calls.
///
/// Only relevant to secret credentials; certificate credentials always send a
/// `client_assertion`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	#[default]
	/// Form POST body parameters for `client_id`/`client_secret`.
	ClientSecretPost,
	/// HTTP Basic with `client_id`/`client_secret`.
	ClientSecretBasic,
}

/// Immutable provider descriptor consumed by the exchanger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Descriptor identifier.
	pub id: ProviderId,
	/// Token endpoint receiving On-Behalf-Of exchanges.
	pub token_endpoint: Url,
	/// Database resource scope every delegated token targets.
	pub resource_scope: ResourceScope,
	/// Issuers whose user assertions are accepted.
	pub trusted_issuers: Vec<String>,
	/// Audiences accepted besides the client id and `api://{client_id}`.
	pub extra_audiences: Vec<String>,
	/// Preferred client authentication mechanism.
	pub preferred_client_auth_method: ClientAuthMethod,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided identifier.
	pub fn builder(id: ProviderId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(id)
	}

	/// Azure AD (Entra ID) preset for `tenant` targeting Azure SQL.
	///
	/// Trusts both the v2.0 and v1 issuer forms of the tenant, since the version of the
	/// inbound assertion depends on the API's app registration.
	pub fn azure_ad(tenant: &str) -> Result<Self, ProviderDescriptorError> {
		if !is_valid_tenant(tenant) {
			return Err(ProviderDescriptorError::InvalidTenant { tenant: tenant.to_owned() });
		}

		let id = ProviderId::new(format!("azure-ad-{tenant}"))
			.map_err(|_| ProviderDescriptorError::InvalidTenant { tenant: tenant.to_owned() })?;
		let token_endpoint = Url::parse(&format!("{AZURE_AUTHORITY}/{tenant}/oauth2/v2.0/token"))
			.map_err(|_| ProviderDescriptorError::InvalidTenant { tenant: tenant.to_owned() })?;
		let resource_scope = ResourceScope::new(AZURE_SQL_SCOPE)
			.map_err(|_| ProviderDescriptorError::MissingResourceScope)?;

		Self::builder(id)
			.token_endpoint(token_endpoint)
			.resource_scope(resource_scope)
			.trusted_issuer(format!("{AZURE_AUTHORITY}/{tenant}/v2.0"))
			.trusted_issuer(format!("https://sts.windows.net/{tenant}/"))
			.build()
	}
}

fn is_valid_tenant(tenant: &str) -> bool {
	!tenant.is_empty() && tenant.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}
