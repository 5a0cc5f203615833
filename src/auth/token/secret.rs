//! Redacting wrapper for bearer material (assertions, access tokens, client secrets).

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Redacted secret wrapper keeping bearer material out of logs.
///
/// Deliberately not `Serialize`: secrets are held in memory only.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` when the secret is empty or whitespace only.
	pub fn is_blank(&self) -> bool {
		self.0.trim().is_empty()
	}

	/// Stable, non-reversible fingerprint (base64url SHA-256) safe to log and compare.
	pub fn fingerprint(&self) -> TokenFingerprint {
		let digest = Sha256::digest(self.0.as_bytes());

		TokenFingerprint(URL_SAFE_NO_PAD.encode(digest))
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Fingerprint identifying one token generation without retaining the token itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TokenFingerprint(String);
impl TokenFingerprint {
	/// Returns the encoded digest.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for TokenFingerprint {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		// Short prefix for log fields.
		f.write_str(&self.0[..self.0.len().min(12)])
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn secret_formatters_redact() {
		let secret = TokenSecret::new("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(\"<redacted>\")");
		assert_eq!(format!("{secret}"), "<redacted>");
	}

	#[test]
	fn fingerprints_distinguish_generations() {
		let first = TokenSecret::new("token-generation-1").fingerprint();
		let again = TokenSecret::new("token-generation-1").fingerprint();
		let second = TokenSecret::new("token-generation-2").fingerprint();

		assert_eq!(first, again);
		assert_ne!(first, second);
		assert_eq!(first.as_str().len(), 43);
		assert!(!first.as_str().contains("token-generation"));
		assert_eq!(first.to_string().len(), 12);
	}

	#[test]
	fn blank_secrets_are_detected() {
		assert!(TokenSecret::new("  ").is_blank());
		assert!(!TokenSecret::new("eyJ0eXAi").is_blank());
	}
}
