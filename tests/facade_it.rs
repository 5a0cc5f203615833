// crates.io
use httpmock::prelude::*;
// self
use obo_sql::{
	_preludet::*,
	auth::{ProviderId, SubjectId, TokenSecret},
	cache::{CacheConfig, TokenCache},
	db::{DatabaseTarget, DriverError, DriverErrorKind, MemoryConnector, ResultSet, SqlValue},
	error::ConnectionError,
	facade::QueryFacade,
	pool::{Pool, PoolConfig},
	provider::ProviderDescriptor,
};

struct Harness {
	exchanger: Arc<CountingExchanger>,
	driver: MemoryConnector,
	facade: QueryFacade,
}

fn harness(driver: MemoryConnector) -> Harness {
	let exchanger = Arc::new(CountingExchanger::new(Duration::hours(1)));
	let cache = Arc::new(TokenCache::new(exchanger.clone(), CacheConfig::default()));
	let pool = Pool::new(Arc::new(driver.clone()), DatabaseTarget::new("srv", "db"), PoolConfig {
		max_size: 4,
		acquire_timeout: StdDuration::from_millis(200),
		..PoolConfig::default()
	});

	Harness { exchanger, driver, facade: QueryFacade::new(cache, pool) }
}

fn subject(value: &str) -> SubjectId {
	SubjectId::new(value).expect("Subject fixture should be valid.")
}

#[tokio::test]
async fn first_query_exchanges_once_and_pools_the_connection() {
	let Harness { exchanger, driver, facade } = harness(MemoryConnector::new());
	let u1 = subject("u1");
	let rows = facade
		.run_query(&u1, &test_assertion("u1"), "SELECT 1", &[])
		.await
		.expect("SELECT 1 should run.");

	assert_eq!(rows.rows, vec![vec![SqlValue::Int(1)]]);
	assert_eq!(exchanger.calls(), 1);
	assert_eq!(driver.connects().len(), 1);
	assert_eq!(driver.connects()[0].subject, u1);
	assert_eq!(facade.pool().free_for(&u1), 1);
	assert_eq!(facade.pool().status().leased, 0);
}

#[tokio::test]
async fn repeated_queries_are_idempotent_and_reuse_state() {
	let Harness { exchanger, driver, facade } = harness(MemoryConnector::new());
	let u1 = subject("u1");
	let assertion = test_assertion("u1");
	let first = facade.run_query(&u1, &assertion, "SELECT 1", &[]).await.expect("Query should run.");
	let second =
		facade.run_query(&u1, &assertion, "SELECT 1", &[]).await.expect("Query should run.");

	assert_eq!(first, second);
	assert_eq!(exchanger.calls(), 1);
	assert_eq!(driver.connects().len(), 1);
	assert_eq!(facade.pool().metrics().reused(), 1);
}

#[tokio::test]
async fn parameters_are_bound_not_interpolated() {
	let driver = MemoryConnector::with_handler(|_, statement| {
		Ok(ResultSet::with_columns(["echo"]).push_row(statement.params.clone()))
	});
	let Harness { driver, facade, .. } = harness(driver);
	let hostile = "x'; DROP TABLE dbo.orders; --";
	let params = [SqlValue::from(hostile), SqlValue::Int(7)];
	let rows = facade
		.run_query(
			&subject("u1"),
			&test_assertion("u1"),
			"SELECT * FROM dbo.orders WHERE note = ? AND id = ?",
			&params,
		)
		.await
		.expect("Query should run.");
	let executed = &driver.executions()[0].statement;

	assert_eq!(executed.text, "SELECT * FROM dbo.orders WHERE note = ? AND id = ?");
	assert_eq!(executed.params, params);
	assert_eq!(rows.rows[0], params);
}

#[tokio::test]
async fn statement_errors_keep_the_connection() {
	let Harness { facade, driver, .. } = harness(MemoryConnector::new());
	let u1 = subject("u1");
	let err = facade
		.run_query(&u1, &test_assertion("u1"), "SELECT * FROM dbo.missing", &[])
		.await
		.expect_err("Unsupported statements should fail.");

	assert!(matches!(
		err,
		Error::QueryFailed { ref diagnostic, .. } if diagnostic.contains("dbo.missing")
	));
	assert!(!err.is_retryable());
	assert_eq!(facade.pool().free_for(&u1), 1);
	assert_eq!(driver.open_connections(), 1);
}

#[tokio::test]
async fn network_errors_invalidate_the_connection() {
	let driver = MemoryConnector::with_handler(|_, _| {
		Err(DriverError::new(
			DriverErrorKind::Network,
			"TCP Provider: An existing connection was forcibly closed.",
		))
	});
	let Harness { facade, driver, .. } = harness(driver);
	let u1 = subject("u1");
	let err = facade
		.run_query(&u1, &test_assertion("u1"), "SELECT 1", &[])
		.await
		.expect_err("Network failures should surface.");

	assert!(matches!(
		err,
		Error::QueryFailed { ref source, .. } if source.kind == DriverErrorKind::Network
	));
	assert_eq!(facade.pool().free_for(&u1), 0);
	assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn slow_queries_time_out_and_discard_the_connection() {
	let exchanger = Arc::new(CountingExchanger::new(Duration::hours(1)));
	let driver = MemoryConnector::new();
	let cache = Arc::new(TokenCache::new(exchanger, CacheConfig::default()));
	let pool =
		Pool::new(Arc::new(driver.clone()), DatabaseTarget::new("srv", "db"), PoolConfig::default());
	let facade = QueryFacade::new(cache, pool).with_query_timeout(StdDuration::from_millis(20));
	let u1 = subject("u1");

	driver.set_execute_delay(StdDuration::from_millis(200));

	let err = facade
		.run_query(&u1, &test_assertion("u1"), "SELECT 1", &[])
		.await
		.expect_err("Slow statements should time out.");

	assert!(matches!(err, Error::TimedOut { operation: "query", .. }));
	assert_eq!(facade.pool().free_for(&u1), 0);
	assert_eq!(facade.pool().status().open, 0);
}

#[tokio::test]
async fn connection_failures_are_retried_once() {
	let Harness { facade, driver, .. } = harness(MemoryConnector::new());
	let u1 = subject("u1");

	driver.fail_next_connect(DriverError::new(DriverErrorKind::Network, "server unreachable"));
	facade
		.run_query(&u1, &test_assertion("u1"), "SELECT 1", &[])
		.await
		.expect("A single connect failure should be absorbed.");
	facade.end_session(&u1).await;
	driver.fail_next_connect(DriverError::new(DriverErrorKind::Network, "server unreachable"));
	driver.fail_next_connect(DriverError::new(DriverErrorKind::Network, "server unreachable"));

	let err = facade
		.run_query(&u1, &test_assertion("u1"), "SELECT 1", &[])
		.await
		.expect_err("Two consecutive failures should surface.");

	assert!(matches!(err, Error::ConnectionUnavailable(ConnectionError::Open { .. })));
}

#[tokio::test]
async fn ending_a_session_drops_token_and_connections() {
	let Harness { exchanger, facade, driver } = harness(MemoryConnector::new());
	let u1 = subject("u1");
	let u2 = subject("u2");

	for (subject, name) in [(&u1, "u1"), (&u2, "u2")] {
		facade
			.run_query(subject, &test_assertion(name), "SELECT 1", &[])
			.await
			.expect("Query should run.");
	}

	facade.end_session(&u1).await;

	assert!(!facade.cache().contains(&u1));
	assert!(facade.cache().contains(&u2));
	assert_eq!(facade.pool().free_for(&u1), 0);
	assert_eq!(facade.pool().free_for(&u2), 1);

	facade
		.run_query(&u1, &test_assertion("u1"), "SELECT 1", &[])
		.await
		.expect("A new session should start cleanly.");

	assert_eq!(exchanger.calls(), 3);
	assert_eq!(driver.connects().len(), 3);
}

#[tokio::test]
async fn consent_failures_open_no_connection() {
	let Harness { exchanger, facade, driver } = harness(MemoryConnector::new());

	exchanger.fail_with(Some(Error::ConsentRequired {
		reason: "AADSTS65001".into(),
		claims: None,
	}));

	let err = facade
		.run_query(&subject("u1"), &test_assertion("u1"), "SELECT 1", &[])
		.await
		.expect_err("Consent failures should surface.");

	assert!(matches!(err, Error::ConsentRequired { .. }));
	assert!(driver.connects().is_empty());
}

#[tokio::test]
async fn maintenance_tasks_start_and_stop() {
	let Harness { facade, .. } = harness(MemoryConnector::new());
	let maintenance = facade.spawn_maintenance();

	facade
		.run_query(&subject("u1"), &test_assertion("u1"), "SELECT 1", &[])
		.await
		.expect("Query should run while maintenance is active.");
	maintenance.shutdown();
}

#[tokio::test]
async fn provider_backed_stack_runs_end_to_end() {
	let server = MockServer::start_async().await;
	let descriptor = ProviderDescriptor::builder(
		ProviderId::new("mock-obo-e2e").expect("Provider identifier should be valid."),
	)
	.token_endpoint(
		Url::parse(&server.url("/token")).expect("Mock token endpoint should parse successfully."),
	)
	.resource_scope(test_scope())
	.trusted_issuer(TEST_ISSUER)
	.build()
	.expect("Provider descriptor should build successfully.");
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"token_type\":\"Bearer\",\"access_token\":\"db-token-e2e\",\"expires_in\":3600}");
		})
		.await;
	let exchanger = build_reqwest_test_exchanger(descriptor, "obo-app-secret");
	let driver = MemoryConnector::new();
	let facade = QueryFacade::new(
		Arc::new(TokenCache::new(Arc::new(exchanger), CacheConfig::default())),
		Pool::new(Arc::new(driver.clone()), DatabaseTarget::new("srv", "db"), PoolConfig::default()),
	);
	let u1 = subject("u1");

	for _ in 0..3 {
		facade
			.run_query(&u1, &test_assertion("u1"), "SELECT 1", &[])
			.await
			.expect("Query should run end to end.");
	}

	mock.assert_calls_async(1).await;

	assert_eq!(driver.connects().len(), 1);
	assert_eq!(driver.connects()[0].fingerprint, TokenSecret::new("db-token-e2e").fingerprint());
}
