//! Demonstrates plugging a custom [`DatabaseConnector`] into the query facade.
//!
//! 1. Implement [`DatabaseConnector`] so each connection authenticates with the delegated token
//!    carried by [`ConnectParams`] (here the token is only inspected, then handed to the
//!    in-memory driver).
//! 2. Build an [`OboExchanger`] against a token endpoint, wrap it in a [`TokenCache`], and pair
//!    it with a [`Pool`] over the connector.
//! 3. Run per-user statements through [`QueryFacade::run_query`]; tokens and connections are
//!    reused per subject.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use time::{Duration, OffsetDateTime};
use url::Url;
// self
use obo_sql::{
	auth::{ClientId, ProviderId, ResourceScope, SubjectId, UserAssertion},
	cache::{CacheConfig, TokenCache},
	credential::CredentialStore,
	db::{
		ConnectFuture, ConnectParams, DatabaseConnector, DatabaseTarget, MemoryConnector,
		ResultSet, SqlValue,
	},
	exchange::{OboExchanger, ReqwestTransportErrorMapper},
	facade::QueryFacade,
	http::ReqwestHttpClient,
	pool::{Pool, PoolConfig},
	provider::{DefaultProviderStrategy, ProviderDescriptor, ProviderStrategy},
	reqwest::Client,
};

const CLIENT_ID: &str = "0b2d7c55-6a1e-4c4b-9a7f-3f1d2c0e9b11";
const ISSUER: &str = "https://login.example.com/demo-tenant/v2.0";

struct AuditingConnector {
	inner: MemoryConnector,
}
impl DatabaseConnector for AuditingConnector {
	fn connect<'a>(&'a self, params: &'a ConnectParams) -> ConnectFuture<'a> {
		println!(
			"Opening connection for {} ({} byte token attribute): {}",
			params.subject,
			params.encode_access_token().len(),
			params.connection_string(),
		);

		self.inner.connect(params)
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-db-token\",\"token_type\":\"Bearer\",\"expires_in\":3600}",
			);
		})
		.await;
	let descriptor = ProviderDescriptor::builder(ProviderId::new("demo-provider")?)
		.token_endpoint(Url::parse(&server.url("/token"))?)
		.resource_scope(ResourceScope::new("https://database.example.net//.default")?)
		.trusted_issuer(ISSUER)
		.build()?;
	let http_client = ReqwestHttpClient::with_client(
		Client::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()?,
	);
	let strategy: Arc<dyn ProviderStrategy> = Arc::new(DefaultProviderStrategy);
	let exchanger = <OboExchanger<ReqwestHttpClient, ReqwestTransportErrorMapper>>::with_http_client(
		descriptor,
		CredentialStore::with_secret(ClientId::new(CLIENT_ID)?, "demo-secret"),
		strategy,
		http_client,
		ReqwestTransportErrorMapper,
	);
	let driver = MemoryConnector::with_handler(|subject, statement| {
		Ok(ResultSet::with_columns(["login", "statement"]).push_row(vec![
			SqlValue::from(subject.to_string()),
			SqlValue::from(statement.text.clone()),
		]))
	});
	let facade = QueryFacade::new(
		Arc::new(TokenCache::new(Arc::new(exchanger), CacheConfig::default())),
		Pool::new(
			Arc::new(AuditingConnector { inner: driver.clone() }),
			DatabaseTarget::new("demo.database.example.net", "reporting")
				.with_application_name("obo-sql-demo"),
			PoolConfig::default(),
		),
	);
	let subject = SubjectId::new("6f1b7d2e-4c1a-4a8e-9b1f-1d2c3b4a5f60")?;
	let assertion = UserAssertion::new(
		subject.clone(),
		"demo-user-assertion",
		CLIENT_ID,
		ISSUER,
		OffsetDateTime::now_utc() + Duration::hours(1),
	);

	for region in ["emea", "apac"] {
		let rows = facade
			.run_query(
				&subject,
				&assertion,
				"SELECT SUSER_SNAME(), total FROM dbo.sales WHERE region = ?",
				&[SqlValue::from(region)],
			)
			.await?;

		println!("Rows for {region}: {:?}.", rows.rows);
	}

	facade.end_session(&subject).await;
	token_mock.assert_async().await;

	println!("Connections opened: {}.", driver.connects().len());

	Ok(())
}
