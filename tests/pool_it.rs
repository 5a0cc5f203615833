// self
use obo_sql::{
	_preludet::*,
	auth::{DelegatedToken, SubjectId},
	db::{
		DatabaseTarget, DriverError, DriverErrorKind, MemoryConnector, ResultSet, SqlValue,
		Statement,
	},
	error::ConnectionError,
	pool::{Pool, PoolConfig},
};

fn subject(value: &str) -> SubjectId {
	SubjectId::new(value).expect("Subject fixture should be valid.")
}

fn token_for(value: &str, lifetime: Duration) -> DelegatedToken {
	DelegatedToken::builder(subject(value), test_scope())
		.access_token(format!("db-token-{value}-{}", OffsetDateTime::now_utc().unix_timestamp_nanos()))
		.issued_now()
		.expires_in(lifetime)
		.build()
		.expect("Token fixture should build.")
}

fn echo_subject_driver() -> MemoryConnector {
	MemoryConnector::with_handler(|subject, _| {
		Ok(ResultSet::with_columns(["subject"]).push_row(vec![SqlValue::Text(subject.to_string())]))
	})
}

fn build_pool(driver: &MemoryConnector, config: PoolConfig) -> Pool {
	Pool::new(Arc::new(driver.clone()), DatabaseTarget::new("srv", "db"), config)
}

fn sized(max_size: usize, acquire_timeout: StdDuration) -> PoolConfig {
	PoolConfig { max_size, acquire_timeout, ..PoolConfig::default() }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connections_never_cross_subjects_under_contention() {
	let driver = echo_subject_driver();
	let pool = build_pool(&driver, sized(3, StdDuration::from_secs(5)));
	let subjects = ["alice", "bob", "carol", "dave", "erin"];
	let tokens = subjects
		.iter()
		.map(|name| (subject(name), token_for(name, Duration::hours(1))))
		.collect::<Vec<_>>();
	let tasks = (0..60)
		.map(|i| {
			let pool = pool.clone();
			let (subject, token) = tokens[i % tokens.len()].clone();

			tokio::spawn(async move {
				let mut conn =
					pool.acquire(&subject, &token).await.expect("Acquire should succeed.");

				assert_eq!(conn.subject(), &subject);

				let rows = conn
					.execute(&Statement::new("SELECT SUSER_SNAME()"))
					.await
					.expect("Statement should run.");

				tokio::task::yield_now().await;
				pool.release(conn).await;

				assert_eq!(rows.rows[0][0], SqlValue::Text(subject.to_string()));
			})
		})
		.collect::<Vec<_>>();

	for task in tasks {
		task.await.expect("Worker should not panic.");
	}

	let connects = driver.connects();

	for execution in driver.executions() {
		let opened = connects
			.iter()
			.find(|record| record.connection_id == execution.connection_id)
			.expect("Every execution should run on an audited connection.");

		assert_eq!(opened.subject, execution.subject);
	}

	let status = pool.status();

	assert!(status.open <= 3);
	assert_eq!(status.leased, 0);
}

#[tokio::test]
async fn leased_connections_are_never_stolen() {
	let driver = MemoryConnector::new();
	let pool = build_pool(&driver, sized(1, StdDuration::from_millis(50)));
	let u1 = subject("u1");
	let u2 = subject("u2");
	let held = pool
		.acquire(&u1, &token_for("u1", Duration::hours(1)))
		.await
		.expect("u1 should lease the only connection.");
	let u2_token = token_for("u2", Duration::hours(1));
	let err = pool.acquire(&u2, &u2_token).await.expect_err("u2 must not take u1's lease.");

	assert!(matches!(
		err,
		Error::ConnectionUnavailable(ConnectionError::PoolExhausted { max_size: 1, .. })
	));
	assert!(held.is_healthy());
	assert_eq!(driver.open_connections(), 1);
	assert_eq!(pool.metrics().exhausted(), 1);

	pool.release(held).await;

	assert_eq!(pool.free_for(&u1), 1);

	let conn = pool.acquire(&u2, &u2_token).await.expect("u2 should evict u1's free connection.");

	assert_eq!(conn.subject(), &u2);
	assert_eq!(pool.free_for(&u1), 0);
	assert_eq!(pool.metrics().evicted(), 1);
	assert_eq!(driver.connects().len(), 2);
	assert_eq!(driver.open_connections(), 1);

	pool.release(conn).await;
}

#[tokio::test]
async fn waiters_proceed_once_capacity_returns() {
	let driver = MemoryConnector::new();
	let pool = build_pool(&driver, sized(1, StdDuration::from_secs(2)));
	let held = pool
		.acquire(&subject("u1"), &token_for("u1", Duration::hours(1)))
		.await
		.expect("u1 should lease the only connection.");
	let waiter = {
		let pool = pool.clone();

		tokio::spawn(async move {
			let conn = pool.acquire(&subject("u2"), &token_for("u2", Duration::hours(1))).await?;
			let subject = conn.subject().clone();

			pool.release(conn).await;

			Ok::<_, Error>(subject)
		})
	};

	tokio::time::sleep(StdDuration::from_millis(20)).await;
	pool.release(held).await;

	let served = waiter
		.await
		.expect("Waiter should not panic.")
		.expect("Waiter should obtain capacity after release.");

	assert_eq!(served.as_ref(), "u2");
}

#[tokio::test]
async fn least_recently_used_free_connection_is_evicted() {
	let driver = MemoryConnector::new();
	let pool = build_pool(&driver, sized(2, StdDuration::from_millis(100)));
	let alice = subject("alice");
	let bob = subject("bob");
	let carol = subject("carol");
	let alice_conn = pool
		.acquire(&alice, &token_for("alice", Duration::hours(1)))
		.await
		.expect("Alice should lease.");
	let bob_conn =
		pool.acquire(&bob, &token_for("bob", Duration::hours(1))).await.expect("Bob should lease.");

	pool.release(alice_conn).await;
	tokio::time::sleep(StdDuration::from_millis(5)).await;
	pool.release(bob_conn).await;

	let carol_conn = pool
		.acquire(&carol, &token_for("carol", Duration::hours(1)))
		.await
		.expect("Carol should evict the oldest free connection.");

	assert_eq!(pool.free_for(&alice), 0);
	assert_eq!(pool.free_for(&bob), 1);

	pool.release(carol_conn).await;
}

#[tokio::test]
async fn one_subject_may_hold_parallel_leases() {
	let driver = MemoryConnector::new();
	let pool = build_pool(&driver, sized(2, StdDuration::from_millis(50)));
	let alice = subject("alice");
	let token = token_for("alice", Duration::hours(1));
	let first = pool.acquire(&alice, &token).await.expect("First lease should succeed.");
	let second = pool.acquire(&alice, &token).await.expect("Second lease should succeed.");

	assert_ne!(first.id(), second.id());
	assert_eq!(pool.status().leased, 2);

	pool.release(first).await;
	pool.release(second).await;

	assert_eq!(pool.free_for(&alice), 2);
}

#[tokio::test]
async fn connect_failures_return_their_slot() {
	let driver = MemoryConnector::new();
	let pool = build_pool(&driver, sized(1, StdDuration::from_millis(50)));
	let alice = subject("alice");
	let token = token_for("alice", Duration::hours(1));

	driver.fail_next_connect(
		DriverError::new(DriverErrorKind::Authentication, "Login failed for user '<token-identified principal>'.")
			.with_code(18456),
	);

	let err = pool.acquire(&alice, &token).await.expect_err("Injected connect failure should surface.");

	assert!(matches!(err, Error::ConnectionUnavailable(ConnectionError::Open { .. })));
	assert_eq!(pool.status().open, 0);

	let conn = pool.acquire(&alice, &token).await.expect("The slot should be usable again.");

	pool.release(conn).await;
}

#[tokio::test]
async fn slow_connects_time_out() {
	let driver = MemoryConnector::new();
	let pool = build_pool(&driver, PoolConfig {
		connect_timeout: StdDuration::from_millis(20),
		..PoolConfig::default()
	});

	driver.set_connect_delay(StdDuration::from_millis(200));

	let err = pool
		.acquire(&subject("alice"), &token_for("alice", Duration::hours(1)))
		.await
		.expect_err("Slow connects should time out.");

	assert!(matches!(err, Error::ConnectionUnavailable(ConnectionError::ConnectTimedOut { .. })));
	assert_eq!(pool.status().open, 0);
}

#[tokio::test]
async fn reaper_closes_expired_connections_within_one_sweep() {
	let driver = MemoryConnector::new();
	let pool = build_pool(&driver, PoolConfig {
		sweep_interval: StdDuration::from_millis(30),
		..PoolConfig::default()
	});
	let reaper = pool.spawn_reaper();

	for name in ["alice", "bob"] {
		let conn = pool
			.acquire(&subject(name), &token_for(name, Duration::milliseconds(40)))
			.await
			.expect("Acquire should succeed.");

		pool.release(conn).await;
	}

	assert_eq!(pool.status().free, 2);

	tokio::time::sleep(StdDuration::from_millis(150)).await;

	assert_eq!(pool.status().free, 0);
	assert_eq!(pool.status().open, 0);
	assert_eq!(driver.open_connections(), 0);

	reaper.abort();
}

#[tokio::test(start_paused = true)]
async fn idle_connections_are_reaped() {
	let driver = MemoryConnector::new();
	let pool = build_pool(&driver, PoolConfig::default());
	let alice = subject("alice");
	let conn = pool
		.acquire(&alice, &token_for("alice", Duration::hours(2)))
		.await
		.expect("Acquire should succeed.");

	pool.release(conn).await;

	assert_eq!(pool.reap().await, 0);

	tokio::time::advance(PoolConfig::default().idle_timeout).await;

	assert_eq!(pool.reap().await, 1);
	assert_eq!(pool.free_for(&alice), 0);
}

#[tokio::test]
async fn broken_connections_are_not_returned() {
	let driver = MemoryConnector::new();
	let pool = build_pool(&driver, PoolConfig::default());
	let alice = subject("alice");
	let conn = pool
		.acquire(&alice, &token_for("alice", Duration::hours(1)))
		.await
		.expect("Acquire should succeed.");

	driver.break_connections();
	pool.release(conn).await;

	assert_eq!(pool.free_for(&alice), 0);
	assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn purging_a_subject_keeps_other_sessions() {
	let driver = MemoryConnector::new();
	let pool = build_pool(&driver, PoolConfig::default());
	let alice = subject("alice");
	let bob = subject("bob");

	for (subject, name) in [(&alice, "alice"), (&bob, "bob")] {
		let conn = pool
			.acquire(subject, &token_for(name, Duration::hours(1)))
			.await
			.expect("Acquire should succeed.");

		pool.release(conn).await;
	}

	assert_eq!(pool.purge_subject(&alice).await, 1);
	assert_eq!(pool.free_for(&alice), 0);
	assert_eq!(pool.free_for(&bob), 1);
	assert_eq!(pool.status().open, 1);
}

#[tokio::test]
async fn refreshed_tokens_do_not_reuse_older_connections() {
	let driver = MemoryConnector::new();
	let pool = build_pool(&driver, PoolConfig::default());
	let alice = subject("alice");
	let now = OffsetDateTime::now_utc();
	let near_expiry = DelegatedToken::builder(alice.clone(), test_scope())
		.access_token("db-token-alice-near-expiry")
		.issued_at(now - Duration::minutes(56))
		.expires_at(now + Duration::minutes(4))
		.build()
		.expect("Near-expiry token fixture should build.");
	let refreshed = DelegatedToken::builder(alice.clone(), test_scope())
		.access_token("db-token-alice-refreshed")
		.issued_at(now)
		.expires_in(Duration::hours(1))
		.build()
		.expect("Refreshed token fixture should build.");
	let conn = pool.acquire(&alice, &near_expiry).await.expect("Acquire should open.");

	pool.release(conn).await;

	assert_eq!(pool.free_for(&alice), 1);

	let conn = pool.acquire(&alice, &refreshed).await.expect("Acquire should open a new connection.");

	assert_eq!(&conn.binding().fingerprint, refreshed.fingerprint());
	assert_eq!(conn.binding().expires_at, refreshed.expires_at());
	assert_eq!(driver.connects().len(), 2);
	assert_eq!(driver.open_connections(), 1);
	assert_eq!(pool.metrics().reused(), 0);

	pool.release(conn).await;

	// A caller still holding the older token may use the newer connection.
	let conn = pool.acquire(&alice, &near_expiry).await.expect("Acquire should reuse.");

	assert_eq!(&conn.binding().fingerprint, refreshed.fingerprint());
	assert_eq!(driver.connects().len(), 2);

	pool.release(conn).await;
}
