// crates.io
use httpmock::prelude::*;
// self
use obo_sql::{
	_preludet::*,
	auth::{AssertionPolicy, ProviderId, SubjectId, UserAssertion},
	error::{AssertionError, ConfigError, TransientError},
	exchange::{GRANT_TYPE_JWT_BEARER, REQUESTED_TOKEN_USE_OBO, RetryPolicy, TokenExchange},
	provider::ProviderDescriptor,
};

const CLIENT_SECRET: &str = "obo-app-secret";

fn build_descriptor(server: &MockServer) -> ProviderDescriptor {
	let provider_id =
		ProviderId::new("mock-obo").expect("Provider identifier should be valid for OBO tests.");

	ProviderDescriptor::builder(provider_id)
		.token_endpoint(
			Url::parse(&server.url("/token")).expect("Mock token endpoint should parse successfully."),
		)
		.resource_scope(test_scope())
		.trusted_issuer(TEST_ISSUER)
		.build()
		.expect("Provider descriptor should build successfully.")
}

#[tokio::test]
async fn exchange_posts_obo_grant_and_maps_token() {
	let server = MockServer::start_async().await;
	let exchanger = build_reqwest_test_exchanger(build_descriptor(&server), CLIENT_SECRET);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.header("content-type", "application/x-www-form-urlencoded")
				.form_urlencoded_tuple("grant_type", GRANT_TYPE_JWT_BEARER)
				.form_urlencoded_tuple("requested_token_use", REQUESTED_TOKEN_USE_OBO)
				.form_urlencoded_tuple("assertion", "assertion-for-user-1")
				.form_urlencoded_tuple("scope", TEST_SCOPE)
				.form_urlencoded_tuple("client_id", TEST_CLIENT_ID)
				.form_urlencoded_tuple("client_secret", CLIENT_SECRET);
			then.status(200).header("content-type", "application/json").body(format!(
				"{{\"token_type\":\"Bearer\",\"access_token\":\"db-token\",\"expires_in\":3599,\"scope\":\"{TEST_SCOPE}\"}}"
			));
		})
		.await;
	let token = exchanger
		.exchange(&test_assertion("user-1"))
		.await
		.expect("OBO exchange should succeed.");

	mock.assert_calls_async(1).await;

	assert_eq!(token.access_token().expose(), "db-token");
	assert_eq!(token.subject().as_ref(), "user-1");
	assert_eq!(token.scope(), &test_scope());
	assert!(!token.is_expired());
	assert_eq!(exchanger.metrics().successes(), 1);
}

#[tokio::test]
async fn consent_errors_are_user_actionable() {
	let server = MockServer::start_async().await;
	let exchanger = build_reqwest_test_exchanger(build_descriptor(&server), CLIENT_SECRET);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(400)
				.header("content-type", "application/json")
				.body(
					"{\"error\":\"invalid_grant\",\"error_description\":\"AADSTS65001: The user or administrator has not consented to use the application.\",\"error_codes\":[65001],\"suberror\":\"consent_required\"}",
				);
		})
		.await;
	let err = exchanger
		.exchange(&test_assertion("user-1"))
		.await
		.expect_err("Consent failures should surface.");

	mock.assert_calls_async(1).await;

	assert!(matches!(err, Error::ConsentRequired { .. }));
	assert!(!err.is_retryable());
}

#[tokio::test]
async fn invalid_grant_is_not_retried() {
	let server = MockServer::start_async().await;
	let exchanger = build_reqwest_test_exchanger(build_descriptor(&server), CLIENT_SECRET);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(400)
				.header("content-type", "application/json")
				.body("{\"error\":\"invalid_grant\",\"error_description\":\"AADSTS50013: Assertion failed signature validation.\"}");
		})
		.await;
	let err = exchanger
		.exchange(&test_assertion("user-1"))
		.await
		.expect_err("Rejected assertions should surface.");

	mock.assert_calls_async(1).await;

	assert!(matches!(err, Error::AssertionInvalid(AssertionError::Rejected { .. })));
}

#[tokio::test]
async fn invalid_client_reports_application_credential() {
	let server = MockServer::start_async().await;
	let exchanger = build_reqwest_test_exchanger(build_descriptor(&server), CLIENT_SECRET);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(401)
				.header("content-type", "application/json")
				.body("{\"error\":\"invalid_client\",\"error_description\":\"AADSTS7000215: Invalid client secret provided.\"}");
		})
		.await;
	let err = exchanger
		.exchange(&test_assertion("user-1"))
		.await
		.expect_err("Bad client credentials should surface.");

	mock.assert_calls_async(1).await;

	assert!(matches!(err, Error::InvalidClient { .. }));
}

#[tokio::test]
async fn server_errors_retry_up_to_attempt_limit() {
	let server = MockServer::start_async().await;
	let exchanger = build_reqwest_test_exchanger(build_descriptor(&server), CLIENT_SECRET);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(503)
				.header("content-type", "application/json")
				.body("{\"error\":\"temporarily_unavailable\"}");
		})
		.await;
	let err = exchanger
		.exchange(&test_assertion("user-1"))
		.await
		.expect_err("Persistent 503s should surface.");

	mock.assert_calls_async(3).await;

	assert!(matches!(
		err,
		Error::ProviderUnavailable(TransientError::TokenEndpoint { status: Some(503), .. })
	));
	assert!(err.is_retryable());
	assert_eq!(exchanger.metrics().provider_calls(), 3);
	assert_eq!(exchanger.metrics().failures(), 1);
}

#[tokio::test]
async fn transient_failure_then_success_recovers() {
	let server = MockServer::start_async().await;
	let descriptor = build_descriptor(&server);
	let exchanger = build_reqwest_test_exchanger(descriptor, CLIENT_SECRET)
		.with_retry_policy(
			RetryPolicy::default()
				.with_max_attempts(2)
				.with_base_delay(StdDuration::from_millis(5))
				.with_max_delay(StdDuration::from_millis(5)),
		);
	let mut failing = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(500).body("upstream hiccup");
		})
		.await;

	assert!(exchanger.exchange(&test_assertion("user-1")).await.is_err());

	failing.assert_calls_async(2).await;
	failing.delete_async().await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"access_token\":\"recovered\",\"expires_in\":\"600\"}");
		})
		.await;

	let token = exchanger
		.exchange(&test_assertion("user-1"))
		.await
		.expect("Exchange should recover once the provider does.");

	assert_eq!(token.access_token().expose(), "recovered");
}

#[tokio::test]
async fn widened_scope_fails_the_exchange() {
	let server = MockServer::start_async().await;
	let exchanger = build_reqwest_test_exchanger(build_descriptor(&server), CLIENT_SECRET);

	server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200)
				.header("content-type", "application/json")
				.body(format!(
					"{{\"access_token\":\"too-broad\",\"expires_in\":3600,\"scope\":\"{TEST_SCOPE} https://graph.example.com/Mail.Read\"}}"
				));
		})
		.await;

	let err = exchanger
		.exchange(&test_assertion("user-1"))
		.await
		.expect_err("Tokens broader than the database resource must be refused.");

	assert!(matches!(err, Error::Config(ConfigError::ScopeWidened { .. })));
}

#[tokio::test]
async fn invalid_assertions_never_reach_the_provider() {
	let server = MockServer::start_async().await;
	let exchanger = build_reqwest_test_exchanger(build_descriptor(&server), CLIENT_SECRET);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).body("{}");
		})
		.await;
	let subject = SubjectId::new("user-1").expect("Subject fixture should be valid.");
	let expired = UserAssertion::new(
		subject.clone(),
		"expired-assertion",
		TEST_CLIENT_ID,
		TEST_ISSUER,
		OffsetDateTime::now_utc() - Duration::minutes(1),
	);
	let foreign_audience = UserAssertion::new(
		subject.clone(),
		"foreign-assertion",
		"api://someone-else",
		TEST_ISSUER,
		OffsetDateTime::now_utc() + Duration::hours(1),
	);
	let untrusted = UserAssertion::new(
		subject,
		"untrusted-assertion",
		TEST_CLIENT_ID,
		"https://evil.example.com/v2.0",
		OffsetDateTime::now_utc() + Duration::hours(1),
	);

	assert!(matches!(
		exchanger.exchange(&expired).await,
		Err(Error::AssertionInvalid(AssertionError::Expired { .. }))
	));
	assert!(matches!(
		exchanger.exchange(&foreign_audience).await,
		Err(Error::AssertionInvalid(AssertionError::WrongAudience { .. }))
	));
	assert!(matches!(
		exchanger.exchange(&untrusted).await,
		Err(Error::AssertionInvalid(AssertionError::UntrustedIssuer { .. }))
	));

	mock.assert_calls_async(0).await;
}

#[test]
fn jwt_assertions_decode_claims() {
	let now = OffsetDateTime::now_utc().unix_timestamp();
	let jwt = unsigned_jwt(&serde_json::json!({
		"aud": TEST_CLIENT_ID,
		"iss": TEST_ISSUER,
		"exp": now + 3600,
		"oid": "6f1b7d2e-4c1a-4a8e-9b1f-1d2c3b4a5f60",
		"sub": "pairwise-subject",
	}));
	let assertion = UserAssertion::from_jwt(&jwt).expect("JWT assertion should decode.");
	let policy = AssertionPolicy::new(
		&obo_sql::auth::ClientId::new(TEST_CLIENT_ID).expect("Client id should be valid."),
		[TEST_ISSUER.to_owned()],
	);

	assert_eq!(assertion.subject().as_ref(), "6f1b7d2e-4c1a-4a8e-9b1f-1d2c3b4a5f60");
	assert_eq!(assertion.token().expose(), jwt);
	assert_eq!(assertion.expires_at().unix_timestamp(), now + 3600);
	assert!(policy.check(&assertion, OffsetDateTime::now_utc()).is_ok());
	assert!(matches!(
		UserAssertion::from_jwt("not-a-jwt"),
		Err(AssertionError::Malformed { .. })
	));
}
