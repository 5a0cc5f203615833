//! Inbound user assertions and the local checks applied before any exchange.
//!
//! An assertion is the short-lived identity token the surrounding application obtained
//! from its own sign-in flow. It is held only for the duration of a request and never
//! persisted. [`UserAssertion::from_jwt`] reads the claims of a JWT assertion without
//! verifying its signature: the identity provider verifies it during the exchange, and
//! the local checks only stop obviously unusable assertions from costing a round trip.
//!
//! Behind Azure App Service authentication ("Easy Auth") the platform forwards the
//! signed-in user's access token in [`EASY_AUTH_ACCESS_TOKEN_HEADER`];
//! [`UserAssertion::from_easy_auth_headers`] reads it from there.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use oauth2::http::HeaderMap;
// self
use crate::{
	_prelude::*,
	auth::{ClientId, SubjectId, TokenSecret},
	error::AssertionError,
};

/// Header Azure App Service authentication uses to forward the user's access token.
pub const EASY_AUTH_ACCESS_TOKEN_HEADER: &str = "x-ms-token-aad-access-token";

/// Identity assertion presented by a signed-in user.
#[derive(Clone)]
pub struct UserAssertion {
	subject: SubjectId,
	token: TokenSecret,
	audience: String,
	issuer: String,
	expires_at: OffsetDateTime,
}
impl UserAssertion {
	/// Builds an assertion from parts already extracted by the caller.
	pub fn new(
		subject: SubjectId,
		token: impl Into<String>,
		audience: impl Into<String>,
		issuer: impl Into<String>,
		expires_at: OffsetDateTime,
	) -> Self {
		Self {
			subject,
			token: TokenSecret::new(token),
			audience: audience.into(),
			issuer: issuer.into(),
			expires_at,
		}
	}

	/// Decodes (without verifying) a JWT assertion.
	///
	/// The subject is the `oid` claim when present, otherwise `sub`.
	pub fn from_jwt(token: impl Into<String>) -> Result<Self, AssertionError> {
		let token = token.into();

		if token.trim().is_empty() {
			return Err(AssertionError::Empty);
		}

		let claims = decode_claims(&token)?;
		let audience = claims.aud.into_single()?;
		let subject = claims
			.oid
			.or(claims.sub)
			.ok_or_else(|| malformed("the token carries neither an oid nor a sub claim"))?;
		let subject = SubjectId::new(subject)
			.map_err(|err| malformed(format!("the subject claim is unusable: {err}")))?;
		let expires_at = OffsetDateTime::from_unix_timestamp(claims.exp)
			.map_err(|_| malformed("the exp claim is out of range"))?;

		Ok(Self { subject, token: TokenSecret::new(token), audience, issuer: claims.iss, expires_at })
	}

	/// Reads the user's access token forwarded by Azure App Service authentication.
	///
	/// Requests without the header fail with [`AssertionError::MissingHeader`]; there is no
	/// fallback to the application's own identity.
	pub fn from_easy_auth_headers(headers: &HeaderMap) -> Result<Self, AssertionError> {
		let value = headers
			.get(EASY_AUTH_ACCESS_TOKEN_HEADER)
			.ok_or(AssertionError::MissingHeader { name: EASY_AUTH_ACCESS_TOKEN_HEADER })?;
		let token = value
			.to_str()
			.map_err(|_| malformed("the forwarded token header is not visible ASCII"))?;

		Self::from_jwt(token.trim())
	}

	/// Subject the assertion was issued to.
	pub fn subject(&self) -> &SubjectId {
		&self.subject
	}

	/// Bearer material. Callers must avoid logging it.
	pub fn token(&self) -> &TokenSecret {
		&self.token
	}

	/// Audience the assertion was issued for.
	pub fn audience(&self) -> &str {
		&self.audience
	}

	/// Authority that issued the assertion.
	pub fn issuer(&self) -> &str {
		&self.issuer
	}

	/// Expiry instant carried by the assertion.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.expires_at
	}

	/// Returns `true` if the assertion has expired at `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}
}
impl Debug for UserAssertion {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("UserAssertion")
			.field("subject", &self.subject)
			.field("token", &"<redacted>")
			.field("audience", &self.audience)
			.field("issuer", &self.issuer)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Local acceptance rules for assertions: audience, issuer, and freshness.
#[derive(Clone, Debug)]
pub struct AssertionPolicy {
	audiences: Vec<String>,
	issuers: Vec<String>,
}
impl AssertionPolicy {
	/// Accepts assertions addressed to `client_id` (bare or as `api://{client_id}`) from any of
	/// the provided issuers.
	pub fn new<I, S>(client_id: &ClientId, issuers: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			audiences: vec![client_id.to_string(), format!("api://{client_id}")],
			issuers: issuers.into_iter().map(Into::into).collect(),
		}
	}

	/// Accepts an additional audience (e.g. a custom application ID URI).
	pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
		self.audiences.push(audience.into());

		self
	}

	/// Checks the assertion against the policy at `now`.
	pub fn check(&self, assertion: &UserAssertion, now: OffsetDateTime) -> Result<(), AssertionError> {
		if assertion.token.is_blank() {
			return Err(AssertionError::Empty);
		}
		if assertion.is_expired_at(now) {
			return Err(AssertionError::Expired { expired_at: assertion.expires_at });
		}
		if !self.audiences.iter().any(|accepted| accepted == &assertion.audience) {
			return Err(AssertionError::WrongAudience { audience: assertion.audience.clone() });
		}

		let issuer = assertion.issuer.trim_end_matches('/');

		if !self.issuers.iter().any(|trusted| trusted.trim_end_matches('/') == issuer) {
			return Err(AssertionError::UntrustedIssuer { issuer: assertion.issuer.clone() });
		}

		Ok(())
	}
}

#[derive(Deserialize)]
struct AssertionClaims {
	aud: AudienceClaim,
	iss: String,
	exp: i64,
	oid: Option<String>,
	sub: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AudienceClaim {
	One(String),
	Many(Vec<String>),
}
impl AudienceClaim {
	fn into_single(self) -> Result<String, AssertionError> {
		match self {
			Self::One(aud) => Ok(aud),
			Self::Many(mut auds) if auds.len() == 1 => Ok(auds.remove(0)),
			Self::Many(_) => Err(malformed("the token must carry exactly one audience")),
		}
	}
}

fn decode_claims(token: &str) -> Result<AssertionClaims, AssertionError> {
	let mut segments = token.split('.');
	let (Some(_header), Some(payload), Some(_signature), None) =
		(segments.next(), segments.next(), segments.next(), segments.next())
	else {
		return Err(malformed("expected three dot-separated segments"));
	};
	let bytes = URL_SAFE_NO_PAD
		.decode(payload.trim_end_matches('='))
		.map_err(|err| malformed(format!("the payload is not base64url: {err}")))?;

	serde_json::from_slice(&bytes)
		.map_err(|err| malformed(format!("the payload claims are unreadable: {err}")))
}

fn malformed(reason: impl Into<String>) -> AssertionError {
	AssertionError::Malformed { reason: reason.into() }
}
