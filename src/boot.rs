//! Cold-start routing: decides which screen a launch lands on.

// self
use crate::{
	_prelude::*,
	auth::{GroupId, Session},
	backend::ProfileDirectory,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	profile::PendingJoinMarker,
	session::{SessionLifecycle, SessionManager},
};

/// Destination chosen by [`BootRouter::route`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BootRoute {
	/// Signed in, profile complete, member of a group.
	Home {
		/// Active session.
		session: Session,
		/// First group the identity belongs to.
		group: GroupId,
	},
	/// Signed in with a complete profile but no group.
	CreateGroup {
		/// Active session.
		session: Session,
	},
	/// Signed in; the profile is missing, incomplete, or unreadable.
	CompleteProfile {
		/// Active session.
		session: Session,
	},
	/// Signed in with an invitation waiting to be accepted.
	JoinGroup {
		/// Active session.
		session: Session,
		/// Invited group.
		group: GroupId,
	},
	/// No usable session.
	Welcome {
		/// Biometric login is enabled, a credential is stored, and the hardware is usable.
		offer_biometric: bool,
	},
}
impl BootRoute {
	/// Stable route path recorded as the last successful navigation.
	pub fn path(&self) -> &'static str {
		match self {
			BootRoute::Home { .. } => "/(main)/home",
			BootRoute::CreateGroup { .. } => "/(onboarding)/create-group",
			BootRoute::CompleteProfile { .. } => "/(onboarding)/profile",
			BootRoute::JoinGroup { .. } => "/(onboarding)/join-group",
			BootRoute::Welcome { .. } => "/(auth)/welcome",
		}
	}

	/// Session the route runs under, if signed in.
	pub fn session(&self) -> Option<&Session> {
		match self {
			BootRoute::Home { session, .. }
			| BootRoute::CreateGroup { session }
			| BootRoute::CompleteProfile { session }
			| BootRoute::JoinGroup { session, .. } => Some(session),
			BootRoute::Welcome { .. } => None,
		}
	}
}

/// Result of [`BootRouter::route`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootDecision {
	/// Destination.
	pub route: BootRoute,
	/// The app was closed long enough for this launch to count as a cold start.
	pub cold_start: bool,
}

/// Launch-time consumer of the session engine.
#[derive(Clone)]
pub struct BootRouter {
	manager: SessionManager,
	directory: Arc<dyn ProfileDirectory>,
	marker: PendingJoinMarker,
	lifecycle: SessionLifecycle,
}
impl BootRouter {
	/// Creates a router.
	pub fn new(
		manager: SessionManager,
		directory: Arc<dyn ProfileDirectory>,
		marker: PendingJoinMarker,
		lifecycle: SessionLifecycle,
	) -> Self {
		Self { manager, directory, marker, lifecycle }
	}

	/// Validates the session and picks the launch destination.
	pub async fn route(&self) -> Result<BootDecision> {
		let span = FlowSpan::new(FlowKind::Boot, "route");

		obs::record_flow_outcome(FlowKind::Boot, FlowOutcome::Attempt);

		let result = span.instrument(self.decide()).await;

		obs::record_flow_outcome(FlowKind::Boot, FlowOutcome::of(&result));

		if let Ok(decision) = &result {
			tracing::info!(
				route = decision.route.path(),
				cold_start = decision.cold_start,
				"Boot route decided."
			);
			self.lifecycle.record_navigation(decision.route.path()).await;
		}

		result
	}

	async fn decide(&self) -> Result<BootDecision> {
		let cold_start = self.lifecycle.is_cold_start().await;

		if cold_start {
			self.lifecycle.record_session_start().await;
		}

		let session = match self.manager.active_session().await {
			Ok(session) => session,
			Err(Error::Unauthenticated) => {
				let offer_biometric = self.offer_biometric().await;

				return Ok(BootDecision { route: BootRoute::Welcome { offer_biometric }, cold_start });
			},
			Err(e) => return Err(e),
		};
		let route = self.route_for(session).await?;

		Ok(BootDecision { route, cold_start })
	}

	async fn route_for(&self, session: Session) -> Result<BootRoute> {
		match self.directory.fetch_profile(&session, &session.identity).await {
			Ok(Some(profile)) if profile.is_complete() => {},
			Ok(_) => return Ok(BootRoute::CompleteProfile { session }),
			Err(e) => {
				tracing::warn!(error = %e, "Profile unreadable at boot.");

				return Ok(BootRoute::CompleteProfile { session });
			},
		}

		if let Some(group) = self.marker.peek().await {
			return Ok(BootRoute::JoinGroup { session, group });
		}

		match self.directory.first_membership(&session, &session.identity).await? {
			Some(group) => Ok(BootRoute::Home { session, group }),
			None => Ok(BootRoute::CreateGroup { session }),
		}
	}

	async fn offer_biometric(&self) -> bool {
		let Some(vault) = self.manager.vault() else {
			return false;
		};

		vault.is_enabled().await
			&& vault.has_credentials().await
			&& vault.availability().await.is_available()
	}
}
impl Debug for BootRouter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BootRouter")
			.field("manager", &self.manager)
			.field("lifecycle", &self.lifecycle)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		_preludet::*,
		auth::{IdentityId, TokenSecret},
		backend::{BackendErrorKind, Profile},
		config::{EngineConfig, LifecyclePolicy},
		store::MemoryStore,
	};

	struct Fixture {
		harness: TestHarness,
		directory: Arc<FakeDirectory>,
		marker: PendingJoinMarker,
		router: BootRouter,
	}

	fn fixture() -> Fixture {
		let harness = build_test_harness(EngineConfig::default());
		let directory = Arc::new(FakeDirectory::default());
		let marker = PendingJoinMarker::new(Arc::new(MemoryStore::default()));
		let lifecycle =
			SessionLifecycle::new(Arc::new(MemoryStore::default()), LifecyclePolicy::default());
		let router =
			BootRouter::new(harness.manager.clone(), directory.clone(), marker.clone(), lifecycle);

		Fixture { harness, directory, marker, router }
	}

	fn complete_profile(id: &str) -> Profile {
		Profile {
			id: IdentityId::new(id).expect("Identity fixture should be valid."),
			email: None,
			name: Some("Ada".into()),
			birthday: Some(macros::date!(1990 - 04 - 01)),
			avatar_url: None,
		}
	}

	fn group_id(value: &str) -> GroupId {
		GroupId::new(value).expect("Group fixture should be valid.")
	}

	async fn route(f: &Fixture) -> BootRoute {
		f.router.route().await.expect("Routing should succeed.").route
	}

	#[tokio::test(start_paused = true)]
	async fn signed_out_launch_offers_biometrics_when_ready() {
		let f = fixture();
		let decision = f.router.route().await.expect("Routing should succeed.");

		assert!(decision.cold_start);
		assert_eq!(decision.route, BootRoute::Welcome { offer_biometric: false });

		f.harness.vault.set_enabled(true).await.expect("Preference should persist.");
		f.harness
			.vault
			.save(&TokenSecret::new("refresh-1"), &IdentityId::new("user-1").expect("Valid id."))
			.await
			.expect("Save should succeed.");
		// The restore fails transiently, so the credential survives for a biometric retry.
		f.harness.identity.push_refresh(Err(BackendErrorKind::Network));

		assert_eq!(route(&f).await, BootRoute::Welcome { offer_biometric: true });
	}

	#[tokio::test(start_paused = true)]
	async fn signed_in_launch_follows_profile_and_membership() {
		let f = fixture();

		f.harness
			.identity
			.set_current(Some(session_fixture("user-1", "refresh-1", Duration::hours(1))));

		assert!(matches!(route(&f).await, BootRoute::CompleteProfile { .. }));

		f.directory.seed_profile(complete_profile("user-1"));

		assert!(matches!(route(&f).await, BootRoute::CreateGroup { .. }));

		f.marker.record(&group_id("group-1")).await.expect("Marker should persist.");

		assert!(matches!(
			route(&f).await,
			BootRoute::JoinGroup { group, .. } if group == group_id("group-1")
		));

		f.marker.clear().await;
		f.directory
			.seed_membership(&group_id("group-2"), &IdentityId::new("user-1").expect("Valid id."));

		assert!(matches!(
			route(&f).await,
			BootRoute::Home { group, .. } if group == group_id("group-2")
		));
	}
}
