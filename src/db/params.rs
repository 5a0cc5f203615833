//! Connection parameters and SQL Server access-token encoding.

// self
use crate::{
	_prelude::*,
	auth::{DelegatedToken, SubjectId, TokenFingerprint, TokenSecret},
	error::ConfigError,
};

/// ODBC pre-connect attribute (`SQL_COPT_SS_ACCESS_TOKEN`) carrying the access token.
pub const SQL_COPT_SS_ACCESS_TOKEN: i32 = 1256;
/// Default SQL Server port.
pub const DEFAULT_SQL_PORT: u16 = 1433;

/// Database every pooled connection points at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseTarget {
	/// Server host name, e.g. `contoso.database.windows.net`.
	pub server: String,
	/// TCP port.
	pub port: u16,
	/// Database name.
	pub database: String,
	/// Require TLS.
	pub encrypt: bool,
	/// Skip server certificate validation. Leave off outside local development.
	pub trust_server_certificate: bool,
	/// Application name reported to the server.
	pub application_name: Option<String>,
	/// Driver login timeout.
	pub login_timeout: StdDuration,
}
impl DatabaseTarget {
	/// Creates an encrypted target on the default port.
	pub fn new(server: impl Into<String>, database: impl Into<String>) -> Self {
		Self {
			server: server.into(),
			port: DEFAULT_SQL_PORT,
			database: database.into(),
			encrypt: true,
			trust_server_certificate: false,
			application_name: None,
			login_timeout: StdDuration::from_secs(30),
		}
	}

	/// Overrides the TCP port.
	pub fn with_port(mut self, port: u16) -> Self {
		self.port = port;

		self
	}

	/// Sets the application name reported to the server.
	pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
		self.application_name = Some(name.into());

		self
	}

	/// Checks the target is addressable.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.server.trim().is_empty() {
			return Err(ConfigError::InvalidSetting { reason: "database server must be set" });
		}
		if self.database.trim().is_empty() {
			return Err(ConfigError::InvalidSetting { reason: "database name must be set" });
		}
		if self.server.contains(';') || self.database.contains(';') {
			return Err(ConfigError::InvalidSetting {
				reason: "database server and name cannot contain `;`",
			});
		}

		Ok(())
	}
}

/// Everything a driver needs to open one token-authenticated connection.
#[derive(Clone, Debug)]
pub struct ConnectParams {
	/// Database to connect to.
	pub target: DatabaseTarget,
	/// Subject the connection is opened for.
	pub subject: SubjectId,
	/// Database-scoped access token.
	pub access_token: TokenSecret,
	/// Fingerprint of `access_token`.
	pub token_fingerprint: TokenFingerprint,
	/// Expiry of `access_token`.
	pub token_expires_at: OffsetDateTime,
}
impl ConnectParams {
	/// Builds parameters for `token` against `target`.
	pub fn new(target: DatabaseTarget, token: &DelegatedToken) -> Self {
		Self {
			target,
			subject: token.subject().clone(),
			access_token: token.access_token().clone(),
			token_fingerprint: token.fingerprint().clone(),
			token_expires_at: token.expires_at(),
		}
	}

	/// Driver connection string. The token is passed out of band and never appears here.
	pub fn connection_string(&self) -> String {
		let target = &self.target;
		let mut out = format!(
			"Server=tcp:{},{};Database={};Encrypt={};TrustServerCertificate={};Connection Timeout={};",
			target.server,
			target.port,
			target.database,
			yes_no(target.encrypt),
			yes_no(target.trust_server_certificate),
			target.login_timeout.as_secs(),
		);

		if let Some(name) = &target.application_name {
			out.push_str(&format!("Application Name={name};"));
		}

		out
	}

	/// Access token payload for [`SQL_COPT_SS_ACCESS_TOKEN`].
	pub fn encode_access_token(&self) -> Vec<u8> {
		encode_access_token(self.access_token.expose())
	}
}

/// Encodes a token as a 4-byte little-endian byte length followed by UTF-16LE code units.
pub fn encode_access_token(token: &str) -> Vec<u8> {
	let utf16 = token.encode_utf16().flat_map(u16::to_le_bytes).collect::<Vec<_>>();
	let mut out = Vec::with_capacity(4 + utf16.len());

	out.extend_from_slice(&(utf16.len() as u32).to_le_bytes());
	out.extend(utf16);

	out
}

fn yes_no(flag: bool) -> &'static str {
	if flag { "yes" } else { "no" }
}
