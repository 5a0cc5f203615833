//! Resource scope modeling: the single downstream resource delegated tokens may target.

// self
use crate::_prelude::*;

const DEFAULT_SUFFIX: &str = "/.default";

/// Errors emitted when validating a resource scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeError {
	/// Empty scopes are not allowed.
	#[error("Resource scope cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Resource scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
	/// Scopes must name a resource URI (`https://…` or `api://…`).
	#[error("Resource scope `{scope}` does not name a resource URI.")]
	NotAResource {
		/// The offending scope string.
		scope: String,
	},
}

/// Scope identifying the database resource, e.g. `https://database.windows.net//.default`.
///
/// The scope is fixed by configuration. [`covers`](Self::covers) decides whether a scope
/// string returned by the provider stays inside the same resource, which is how the
/// exchanger enforces that delegated tokens are never broader than the database.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceScope {
	scope: String,
	resource: String,
}
impl ResourceScope {
	/// Validates and wraps a resource scope.
	pub fn new(value: impl Into<String>) -> Result<Self, ScopeError> {
		let scope = value.into();

		if scope.is_empty() {
			return Err(ScopeError::Empty);
		}
		if scope.chars().any(char::is_whitespace) {
			return Err(ScopeError::ContainsWhitespace { scope });
		}

		let Some((_, rest)) = scope.split_once("://") else {
			return Err(ScopeError::NotAResource { scope });
		};

		let host = rest.trim_start_matches('/');

		if host.is_empty() || host.starts_with(".default") {
			return Err(ScopeError::NotAResource { scope });
		}

		let resource =
			scope.strip_suffix(DEFAULT_SUFFIX).unwrap_or(&scope).trim_end_matches('/').to_owned();

		Ok(Self { scope, resource })
	}

	/// Full scope string sent to the token endpoint.
	pub fn as_str(&self) -> &str {
		&self.scope
	}

	/// Resource URI the scope belongs to, without the `/.default` suffix or trailing slash.
	pub fn resource(&self) -> &str {
		&self.resource
	}

	/// Returns `true` if `granted` names this resource or a permission on it.
	///
	/// Unqualified values (no `://`) are permissions relative to the requested resource.
	pub fn covers(&self, granted: &str) -> bool {
		if granted == self.scope || granted.trim_end_matches('/') == self.resource {
			return true;
		}
		if !granted.contains("://") {
			return !granted.is_empty();
		}

		granted
			.strip_prefix(self.resource.as_str())
			.is_some_and(|rest| rest.starts_with('/') && !rest.trim_start_matches('/').is_empty())
	}
}
impl Debug for ResourceScope {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ResourceScope").field(&self.scope).finish()
	}
}
impl Display for ResourceScope {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.scope)
	}
}
impl FromStr for ResourceScope {
	type Err = ScopeError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::new(s)
	}
}
impl TryFrom<String> for ResourceScope {
	type Error = ScopeError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl From<ResourceScope> for String {
	fn from(value: ResourceScope) -> Self {
		value.scope
	}
}
