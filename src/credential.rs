//! The application's own client credential, presented on every token exchange.
//!
//! Read-only after construction, so the store is shared behind `Arc` without locking.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::{ClientId, TokenSecret},
	provider::ClientAuthMethod,
};

/// `client_assertion_type` value for certificate (signed JWT) credentials.
pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
	"urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Secret material proving the application's identity to the provider.
#[derive(Clone, Debug)]
pub enum ClientCredential {
	/// Shared client secret.
	Secret(TokenSecret),
	/// Pre-signed client assertion produced from the application's certificate.
	Assertion(TokenSecret),
}

/// Registered client id plus its credential.
#[derive(Clone, Debug)]
pub struct CredentialStore {
	client_id: ClientId,
	credential: ClientCredential,
}
impl CredentialStore {
	/// Stores a client secret credential.
	pub fn with_secret(client_id: ClientId, secret: impl Into<String>) -> Self {
		Self { client_id, credential: ClientCredential::Secret(TokenSecret::new(secret)) }
	}

	/// Stores a certificate credential in its signed client assertion form.
	pub fn with_client_assertion(client_id: ClientId, assertion: impl Into<String>) -> Self {
		Self { client_id, credential: ClientCredential::Assertion(TokenSecret::new(assertion)) }
	}

	/// Client id the application is registered under.
	pub fn client_id(&self) -> &ClientId {
		&self.client_id
	}

	/// Stored credential.
	pub fn credential(&self) -> &ClientCredential {
		&self.credential
	}

	/// Returns `true` when the stored secret or assertion is blank.
	pub fn is_blank(&self) -> bool {
		match &self.credential {
			ClientCredential::Secret(secret) | ClientCredential::Assertion(secret) =>
				secret.is_blank(),
		}
	}

	/// Writes the client authentication fields into `form`.
	///
	/// Returns the `Authorization` header value when the secret travels via HTTP Basic.
	pub fn authenticate(
		&self,
		method: ClientAuthMethod,
		form: &mut BTreeMap<String, String>,
	) -> Option<String> {
		form.insert("client_id".into(), self.client_id.to_string());

		match (&self.credential, method) {
			(ClientCredential::Secret(secret), ClientAuthMethod::ClientSecretPost) => {
				form.insert("client_secret".into(), secret.expose().to_owned());

				None
			},
			(ClientCredential::Secret(secret), ClientAuthMethod::ClientSecretBasic) => {
				// RFC 6749 §2.3.1: both parts are form-encoded before base64.
				let user = form_urlencoded::byte_serialize(self.client_id.as_bytes()).collect::<String>();
				let pass =
					form_urlencoded::byte_serialize(secret.expose().as_bytes()).collect::<String>();

				Some(format!("Basic {}", STANDARD.encode(format!("{user}:{pass}"))))
			},
			(ClientCredential::Assertion(assertion), _) => {
				form.insert(
					"client_assertion_type".into(),
					CLIENT_ASSERTION_TYPE_JWT_BEARER.into(),
				);
				form.insert("client_assertion".into(), assertion.expose().to_owned());

				None
			},
		}
	}
}
