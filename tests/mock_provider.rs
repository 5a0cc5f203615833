// self
use obo_sql::{
	_preludet::*,
	auth::ProviderId,
	provider::{
		ClientAuthMethod, DefaultProviderStrategy, ProviderDescriptor, ProviderDescriptorBuilder,
		ProviderDescriptorError, ProviderErrorContext, ProviderErrorKind, ProviderStrategy,
	},
};

fn url(value: &str) -> Url {
	Url::parse(value).expect("Failed to parse mock provider URL.")
}

fn builder(id: &str) -> ProviderDescriptorBuilder {
	let provider_id =
		ProviderId::new(id).expect("Failed to build provider identifier for mock descriptor.");

	ProviderDescriptor::builder(provider_id)
}

#[test]
fn descriptor_rejects_insecure_endpoints_and_missing_fields() {
	let err = builder("mock-no-scope")
		.token_endpoint(url("https://example.com/token"))
		.trusted_issuer(TEST_ISSUER)
		.build()
		.expect_err("Descriptor builder should require a resource scope.");

	assert!(matches!(err, ProviderDescriptorError::MissingResourceScope));

	let err = builder("mock-no-issuer")
		.token_endpoint(url("https://example.com/token"))
		.resource_scope(test_scope())
		.trusted_issuer("  ")
		.build()
		.expect_err("Descriptor builder should require a trusted issuer.");

	assert!(matches!(err, ProviderDescriptorError::NoTrustedIssuers));

	let err = builder("mock-insecure")
		.token_endpoint(url("http://example.com/token"))
		.resource_scope(test_scope())
		.trusted_issuer(TEST_ISSUER)
		.build()
		.expect_err("Descriptor builder should reject insecure token endpoints.");

	assert!(matches!(err, ProviderDescriptorError::InsecureEndpoint { endpoint: "token", .. }));

	let err = builder("mock-no-endpoint")
		.resource_scope(test_scope())
		.trusted_issuer(TEST_ISSUER)
		.build()
		.expect_err("Descriptor builder should require a token endpoint.");

	assert!(matches!(err, ProviderDescriptorError::MissingTokenEndpoint));
}

#[test]
fn descriptor_keeps_configured_fields() {
	let descriptor = builder("mock-fields")
		.token_endpoint(url("https://example.com/tenant/oauth2/v2.0/token"))
		.resource_scope(test_scope())
		.trusted_issuers([TEST_ISSUER, "https://sts.example.com/tenant/"])
		.extra_audience("api://reporting")
		.preferred_client_auth_method(ClientAuthMethod::ClientSecretBasic)
		.build()
		.expect("Descriptor builder should succeed for secure endpoints.");

	assert_eq!(descriptor.token_endpoint.as_str(), "https://example.com/tenant/oauth2/v2.0/token");
	assert_eq!(descriptor.resource_scope, test_scope());
	assert_eq!(descriptor.trusted_issuers.len(), 2);
	assert_eq!(descriptor.extra_audiences, vec!["api://reporting".to_owned()]);
	assert_eq!(descriptor.preferred_client_auth_method, ClientAuthMethod::ClientSecretBasic);
}

#[test]
fn azure_preset_builds_for_guid_tenants() {
	let descriptor = ProviderDescriptor::azure_ad("72f988bf-86f1-41af-91ab-2d7cd011db47")
		.expect("GUID tenants should be accepted.");

	assert_eq!(descriptor.id.as_ref(), "azure-ad-72f988bf-86f1-41af-91ab-2d7cd011db47");
	assert_eq!(descriptor.token_endpoint.scheme(), "https");
	assert!(descriptor.resource_scope.as_str().ends_with("/.default"));
}

#[test]
fn default_strategy_prefers_oauth_error_fields() {
	let strategy = DefaultProviderStrategy;
	let ctx = ProviderErrorContext::new().with_http_status(400).with_oauth_error("invalid_grant");

	assert_eq!(strategy.classify_token_error(&ctx), ProviderErrorKind::InvalidGrant);

	let ctx = ProviderErrorContext::new().with_http_status(401).with_oauth_error("invalid_client");

	assert_eq!(strategy.classify_token_error(&ctx), ProviderErrorKind::InvalidClient);

	let ctx = ProviderErrorContext::new().with_http_status(400).with_oauth_error("invalid_scope");

	assert_eq!(strategy.classify_token_error(&ctx), ProviderErrorKind::InvalidClient);
}

#[test]
fn default_strategy_falls_back_to_status_and_body() {
	let strategy = DefaultProviderStrategy;
	let ctx = ProviderErrorContext::new().with_http_status(401);

	assert_eq!(strategy.classify_token_error(&ctx), ProviderErrorKind::InvalidClient);

	let body_ctx = ProviderErrorContext::new().with_body_preview("error=consent_required");

	assert_eq!(strategy.classify_token_error(&body_ctx), ProviderErrorKind::ConsentRequired);

	let status_ctx = ProviderErrorContext::new().with_http_status(503);

	assert_eq!(strategy.classify_token_error(&status_ctx), ProviderErrorKind::Transient);

	let network_ctx = ProviderErrorContext::network_failure();

	assert_eq!(strategy.classify_token_error(&network_ctx), ProviderErrorKind::Transient);
}

#[test]
fn default_strategy_reads_error_description_when_missing_error_code() {
	let strategy = DefaultProviderStrategy;
	let ctx = ProviderErrorContext::new()
		.with_http_status(500)
		.with_error_description("invalid_grant: assertion already used");

	assert_eq!(strategy.classify_token_error(&ctx), ProviderErrorKind::InvalidGrant);

	let consent = ProviderErrorContext::new()
		.with_http_status(400)
		.with_error_description("AADSTS65001: The user or administrator has not consented.");

	assert_eq!(strategy.classify_token_error(&consent), ProviderErrorKind::ConsentRequired);
}

#[test]
fn custom_strategy_can_augment_token_requests() {
	struct TenantHintStrategy;
	impl ProviderStrategy for TenantHintStrategy {
		fn classify_token_error(&self, _ctx: &ProviderErrorContext) -> ProviderErrorKind {
			ProviderErrorKind::InvalidGrant
		}

		fn augment_token_request(&self, form: &mut BTreeMap<String, String>) {
			form.insert("x-tenant-hint".into(), "contoso".into());
		}
	}

	let strategy = TenantHintStrategy;
	let mut form = BTreeMap::new();

	strategy.augment_token_request(&mut form);

	assert_eq!(form.get("x-tenant-hint").map(String::as_str), Some("contoso"));
	assert_eq!(
		strategy.classify_token_error(&ProviderErrorContext::new()),
		ProviderErrorKind::InvalidGrant
	);
	// The default hook leaves the form untouched.
	let mut untouched = BTreeMap::new();

	DefaultProviderStrategy.augment_token_request(&mut untouched);

	assert!(untouched.is_empty());
}
