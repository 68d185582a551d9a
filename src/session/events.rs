//! Out-of-band authentication events pushed by the identity backend.

// self
use crate::{_prelude::*, auth::Session, session::SessionManager};

/// Authentication state change reported by the identity backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
	/// A sign-in completed.
	SignedIn(Session),
	/// The backend rotated the session on its own.
	TokenRefreshed(Session),
	/// User attributes changed; the session is re-issued.
	UserUpdated(Session),
	/// The session ended.
	SignedOut,
}
impl AuthEvent {
	/// Session carried by the event, if any.
	pub fn session(&self) -> Option<&Session> {
		match self {
			AuthEvent::SignedIn(session)
			| AuthEvent::TokenRefreshed(session)
			| AuthEvent::UserUpdated(session) => Some(session),
			AuthEvent::SignedOut => None,
		}
	}
}

impl SessionManager {
	/// Applies an event from the identity backend.
	///
	/// Events carrying a session are adopted, which starts the validity grace window and keeps
	/// the biometric credential current. [`AuthEvent::SignedOut`] drops the cached session and
	/// clears the vault without calling the backend again.
	pub async fn handle_auth_event(&self, event: AuthEvent) {
		match event {
			AuthEvent::SignedIn(session)
			| AuthEvent::TokenRefreshed(session)
			| AuthEvent::UserUpdated(session) => {
				tracing::debug!(identity = %session.identity, "Adopting session from auth event.");
				self.adopt_session(session).await;
			},
			AuthEvent::SignedOut => {
				*self.inner.cached.write() = None;
				*self.inner.last_rotation.lock() = None;

				if let Some(vault) = self.vault() {
					vault.clear().await;
				}

				tracing::debug!("Cleared session after sign-out event.");
			},
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, config::EngineConfig, store::KeyValueStore};

	#[tokio::test(start_paused = true)]
	async fn token_refreshed_event_opens_the_grace_window() {
		let harness = build_test_harness(EngineConfig::default());
		let session = session_fixture("user-1", "refresh-2", Duration::hours(1));

		harness.vault.set_enabled(true).await.expect("Preference should persist.");
		harness.manager.handle_auth_event(AuthEvent::TokenRefreshed(session)).await;

		assert!(harness.manager.rotated_within(StdDuration::from_secs(60)));
		assert_eq!(
			harness.store.get(crate::vault::REFRESH_TOKEN_KEY).await.expect("Read should work."),
			Some("refresh-2".into())
		);
	}

	#[tokio::test]
	async fn signed_out_event_clears_local_state_only() {
		let harness = build_test_harness(EngineConfig::default());

		harness.vault.set_enabled(true).await.expect("Preference should persist.");
		harness
			.manager
			.handle_auth_event(AuthEvent::SignedIn(session_fixture(
				"user-1",
				"refresh-1",
				Duration::hours(1),
			)))
			.await;
		harness.manager.handle_auth_event(AuthEvent::SignedOut).await;

		assert!(harness.manager.current_session().is_none());
		assert!(!harness.vault.has_credentials().await);
		assert_eq!(harness.identity.sign_out_calls(), 0);
	}
}
