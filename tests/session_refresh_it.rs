// crates.io
use futures::future;
// self
use session_continuity::{
	_preludet::*,
	auth::{IdentityId, TokenSecret},
	backend::BackendErrorKind,
	config::EngineConfig,
	store::KeyValueStore,
	vault::REFRESH_TOKEN_KEY,
};

const CALLERS: usize = 8;

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_refresh_for_an_expired_session() {
	let harness = build_test_harness(EngineConfig::default());

	harness
		.identity
		.set_current(Some(session_fixture("user-1", "refresh-1", Duration::seconds(-30))));
	harness.identity.set_refresh_delay(StdDuration::from_millis(300));

	let outcomes =
		future::join_all((0..CALLERS).map(|_| harness.manager.ensure_valid_session())).await;

	assert!(outcomes.into_iter().all(|valid| valid));
	assert_eq!(harness.identity.refresh_calls(), 1);
	assert_eq!(harness.manager.metrics().flights(), 1);
	assert_eq!(harness.manager.metrics().network_calls(), 1);
	assert!(!harness.manager.refresh_in_flight());
	assert_eq!(
		harness
			.manager
			.current_session()
			.expect("Refreshed session should be cached.")
			.refresh_token
			.expose(),
		"refresh-rotated-1"
	);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_vault_restore_when_no_session_exists() {
	let harness = build_test_harness(EngineConfig::default());

	harness.vault.set_enabled(true).await.expect("Preference should persist.");
	harness
		.vault
		.save(
			&TokenSecret::new("vault-refresh"),
			&IdentityId::new("user-1").expect("Identity fixture should be valid."),
		)
		.await
		.expect("Vault save should succeed.");
	harness.identity.set_refresh_delay(StdDuration::from_millis(300));

	let tasks = (0..CALLERS).map(|_| {
		let manager = harness.manager.clone();

		tokio::spawn(async move { manager.ensure_valid_session().await })
	});

	for outcome in future::join_all(tasks).await {
		assert!(outcome.expect("Caller task should join."));
	}

	assert_eq!(harness.identity.refresh_calls(), 1);
	assert_eq!(harness.manager.metrics().flights(), 1);
	// The rotated credential replaces the one that was just spent.
	assert_eq!(
		harness.store.get(REFRESH_TOKEN_KEY).await.expect("Vault read should work."),
		Some("refresh-rotated-1".into())
	);
}

#[tokio::test(start_paused = true)]
async fn two_timeouts_then_success_follow_the_backoff_schedule() {
	let harness = build_test_harness(EngineConfig::default());
	let started = Instant::now();

	harness
		.identity
		.set_current(Some(session_fixture("user-1", "refresh-1", Duration::seconds(-30))));
	harness.identity.push_refresh(Err(BackendErrorKind::Timeout));
	harness.identity.push_refresh(Err(BackendErrorKind::Timeout));
	harness.identity.push_refresh(Ok(session_fixture("user-1", "refresh-2", Duration::hours(1))));

	let session = harness.manager.active_session().await.expect("Third attempt should succeed.");
	let elapsed = started.elapsed();

	assert_eq!(session.refresh_token.expose(), "refresh-2");
	assert_eq!(harness.identity.refresh_calls(), 3);
	// 1s + 2s of backoff between the three attempts.
	assert!(elapsed >= StdDuration::from_secs(3), "Elapsed {elapsed:?} is too short.");
	assert!(elapsed < StdDuration::from_secs(4), "Elapsed {elapsed:?} is too long.");
}

#[tokio::test(start_paused = true)]
async fn recent_rotation_skips_every_read() {
	let harness = build_test_harness(EngineConfig::default());

	harness
		.manager
		.adopt_session(session_fixture("user-1", "refresh-1", Duration::hours(1)))
		.await;
	harness.identity.hang_current(true);

	tokio::time::advance(StdDuration::from_secs(4 * 60)).await;

	assert!(!harness.manager.is_expired_or_expiring_soon().await);
	assert!(harness.manager.ensure_valid_session().await);
	assert_eq!(harness.identity.current_session_calls(), 0);
	assert_eq!(harness.identity.refresh_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_require_sign_in() {
	let harness = build_test_harness(EngineConfig::default());

	harness
		.identity
		.set_current(Some(session_fixture("user-1", "refresh-1", Duration::seconds(-30))));
	harness.identity.push_refresh(Err(BackendErrorKind::InvalidGrant));

	let err = harness.manager.active_session().await.expect_err("Rejected refresh must fail.");

	assert!(matches!(err, Error::Unauthenticated));
	assert_eq!(harness.identity.refresh_calls(), 1);
	assert_eq!(harness.manager.metrics().failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_backend_cannot_pin_the_flight_through_the_vault() {
	let harness = build_test_harness(EngineConfig::default());

	harness
		.identity
		.set_current(Some(session_fixture("user-1", "refresh-1", Duration::seconds(-30))));
	harness.vault.set_enabled(true).await.expect("Preference should persist.");
	harness
		.vault
		.save(
			&TokenSecret::new("vault-refresh"),
			&IdentityId::new("user-1").expect("Identity fixture should be valid."),
		)
		.await
		.expect("Vault save should succeed.");
	harness.identity.hang_refreshes(true);

	let started = Instant::now();
	let valid = tokio::time::timeout(
		StdDuration::from_secs(600),
		harness.manager.ensure_valid_session(),
	)
	.await
	.expect("Every network call in the flight should be bounded.");

	// Three refresh attempts with backoff, then one bounded vault exchange.
	assert!(!valid);
	assert!(started.elapsed() < StdDuration::from_secs(90));
	assert!(!harness.manager.refresh_in_flight());
	assert_eq!(harness.identity.refresh_calls(), 4);
	assert!(harness.vault.has_credentials().await);
}
