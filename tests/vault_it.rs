// self
use session_continuity::{
	_preludet::*,
	auth::{IdentityId, TokenSecret},
	backend::BackendErrorKind,
	config::EngineConfig,
	vault::PromptOutcome,
};

fn identity() -> IdentityId {
	IdentityId::new("user-1").expect("Identity fixture should be valid.")
}

async fn seed_vault(harness: &TestHarness) {
	harness.vault.set_enabled(true).await.expect("Preference should persist.");
	harness
		.vault
		.save(&TokenSecret::new("vault-refresh"), &identity())
		.await
		.expect("Vault save should succeed.");
}

#[tokio::test]
async fn rejected_vault_token_empties_the_vault() {
	let harness = build_test_harness(EngineConfig::default());

	seed_vault(&harness).await;
	harness.identity.push_refresh(Err(BackendErrorKind::InvalidGrant));

	let err = harness.vault.restore_silently().await.expect_err("Rejected token must fail.");

	assert!(matches!(err, Error::InvalidCredential { .. }));
	assert!(!harness.vault.has_credentials().await);
	assert!(harness.vault.stored_identity().await.is_none());

	let err = harness.vault.restore_silently().await.expect_err("Empty vault must fail.");

	assert!(matches!(err, Error::InvalidCredential { .. }));
	assert_eq!(harness.identity.refresh_calls(), 1);
}

#[tokio::test]
async fn biometric_restore_adopts_the_rotated_session() {
	let harness = build_test_harness(EngineConfig::default());

	seed_vault(&harness).await;

	let session = harness
		.manager
		.restore_with_biometrics("Sign in to continue")
		.await
		.expect("Biometric restore should succeed.");

	assert_eq!(session.identity, identity());
	assert_eq!(harness.prompt.prompts(), 1);
	assert_eq!(harness.manager.current_session(), Some(session.clone()));
	assert_eq!(
		harness.vault.stored_identity().await,
		Some(identity()),
		"Rotated credential should stay bound to the same identity."
	);
	assert!(harness.manager.rotated_within(StdDuration::from_secs(1)));
}

#[tokio::test]
async fn declined_prompt_leaves_everything_in_place() {
	let harness = build_test_harness(EngineConfig::default());

	seed_vault(&harness).await;
	harness.prompt.push_outcome(PromptOutcome::Cancelled);

	let err = harness
		.manager
		.restore_with_biometrics("Sign in to continue")
		.await
		.expect_err("Cancelled prompt must fail.");

	assert!(err.is_user_declined());
	assert!(harness.vault.has_credentials().await);
	assert!(harness.manager.current_session().is_none());
	assert_eq!(harness.identity.refresh_calls(), 0);
}
