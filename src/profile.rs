//! Profile creation and group join guarded against duplicate concurrent sign-ins.
//!
//! Several sign-in paths (OAuth redirect, auth event, password sign-in) may fire for the same
//! identity at nearly the same moment. [`ProfileGuard`] lets exactly one of them write; the
//! others wait for it and report what the backend ended up with.

pub mod pending;

pub use pending::PendingJoinMarker;

// self
use crate::{
	_prelude::*,
	auth::{GroupId, IdentityId, Session},
	backend::{
		BackendError, BackendErrorKind, IdentityClient, MembershipRole, NewMembership, NewProfile,
		ProfileDirectory, ProfilePatch,
	},
	config::GuardPolicy,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

/// Onboarding answers collected before (or during) sign-in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OnboardingSnapshot {
	/// Display name.
	pub name: Option<String>,
	/// Birthday.
	pub birthday: Option<time::Date>,
	/// Avatar image URL.
	pub avatar_url: Option<String>,
	/// Group the user was invited to, overriding the stored marker.
	pub pending_group: Option<GroupId>,
}
impl OnboardingSnapshot {
	fn patch(&self) -> ProfilePatch {
		ProfilePatch {
			name: self.name.clone().filter(|name| !name.trim().is_empty()),
			birthday: self.birthday,
			avatar_url: self.avatar_url.clone().filter(|url| !url.trim().is_empty()),
		}
	}
}

/// Result of [`ProfileGuard::ensure_profile_and_join`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JoinOutcome {
	/// Membership in `group_id` is confirmed.
	pub joined_group: bool,
	/// Group the call tried to join, if any.
	pub group_id: Option<GroupId>,
	/// This call inserted the profile row.
	pub profile_created: bool,
}

/// Serializes profile and membership writes per identity.
#[derive(Clone)]
pub struct ProfileGuard {
	inner: Arc<GuardInner>,
}
impl ProfileGuard {
	/// Creates a guard writing through `directory`.
	pub fn new(
		identity: Arc<dyn IdentityClient>,
		directory: Arc<dyn ProfileDirectory>,
		marker: PendingJoinMarker,
		policy: GuardPolicy,
	) -> Self {
		Self {
			inner: Arc::new(GuardInner {
				identity,
				directory,
				marker,
				policy,
				processing: Mutex::new(HashSet::new()),
			}),
		}
	}

	/// Pending group-join marker used when the snapshot names no group.
	pub fn marker(&self) -> &PendingJoinMarker {
		&self.inner.marker
	}

	/// Returns `true` while a call for `identity` is writing.
	pub fn is_processing(&self, identity: &IdentityId) -> bool {
		self.inner.processing.lock().contains(identity)
	}

	/// Forgets every in-progress identity so tests can reuse a guard.
	pub fn reset(&self) {
		self.inner.processing.lock().clear();
	}

	/// Ensures the profile row exists, then joins the pending group.
	///
	/// A duplicate call for an identity already being processed waits for the first call and
	/// re-reads backend state instead of writing. Profile failures are fatal
	/// ([`Error::ProfileCreationFailed`]); join failures report `joined_group: false` and keep the
	/// pending marker for a later attempt.
	pub async fn ensure_profile_and_join(
		&self,
		identity: &IdentityId,
		session: &Session,
		snapshot: &OnboardingSnapshot,
	) -> Result<JoinOutcome> {
		let span = FlowSpan::new(FlowKind::ProfileJoin, "ensure_profile_and_join");

		obs::record_flow_outcome(FlowKind::ProfileJoin, FlowOutcome::Attempt);

		let result = match ProcessingClaim::acquire(&self.inner, identity) {
			Some(_claim) => span.instrument(self.write_through(identity, session, snapshot)).await,
			None => span.instrument(self.await_duplicate(identity, session, snapshot)).await,
		};

		obs::record_flow_outcome(FlowKind::ProfileJoin, FlowOutcome::of(&result));

		result
	}

	async fn write_through(
		&self,
		identity: &IdentityId,
		session: &Session,
		snapshot: &OnboardingSnapshot,
	) -> Result<JoinOutcome> {
		let profile_created = self.upsert_profile(identity, session, snapshot).await.map_err(|e| {
			tracing::error!(%identity, error = %e, "Profile could not be ensured.");

			Error::ProfileCreationFailed { reason: e.to_string() }
		})?;
		let Some(group) = self.target_group(snapshot).await else {
			return Ok(JoinOutcome { joined_group: false, group_id: None, profile_created });
		};
		let joined_group = self.join_group(identity, session, &group).await;

		if joined_group {
			self.inner.marker.consume(&group).await;
		}

		Ok(JoinOutcome { joined_group, group_id: Some(group), profile_created })
	}

	async fn await_duplicate(
		&self,
		identity: &IdentityId,
		session: &Session,
		snapshot: &OnboardingSnapshot,
	) -> Result<JoinOutcome> {
		let policy = &self.inner.policy;
		let started = Instant::now();

		tracing::debug!(%identity, "Duplicate profile call; waiting for the first one.");

		while self.is_processing(identity) && started.elapsed() < policy.duplicate_wait {
			tokio::time::sleep(policy.duplicate_poll).await;
		}

		let directory = &self.inner.directory;
		let profile = directory
			.fetch_profile(session, identity)
			.await
			.map_err(|e| Error::ProfileCreationFailed { reason: e.to_string() })?;

		if profile.is_none() {
			return Err(Error::ProfileCreationFailed {
				reason: "Concurrent call finished without a profile row".into(),
			});
		}

		let group = self.target_group(snapshot).await;
		let joined_group = match &group {
			Some(group) => match directory.membership_exists(session, group, identity).await {
				Ok(exists) => exists,
				Err(e) => {
					tracing::warn!(%group, error = %e, "Membership re-read failed.");

					false
				},
			},
			None => false,
		};

		Ok(JoinOutcome { joined_group, group_id: group, profile_created: false })
	}

	// Returns `true` when this call inserted the row.
	async fn upsert_profile(
		&self,
		identity: &IdentityId,
		session: &Session,
		snapshot: &OnboardingSnapshot,
	) -> Result<bool, BackendError> {
		let directory = &self.inner.directory;
		let patch = snapshot.patch();

		if directory.fetch_profile(session, identity).await?.is_some() {
			self.apply_patch(identity, session, patch).await?;

			return Ok(false);
		}

		// The backend's user record is authoritative; cached addresses may be stale.
		let email = self.inner.identity.fetch_user(session).await?.email;
		let row = NewProfile {
			id: identity.clone(),
			email,
			name: patch.name.clone(),
			birthday: patch.birthday,
			avatar_url: patch.avatar_url.clone(),
		};

		match directory.insert_profile(session, row).await {
			Ok(_) => {
				tracing::info!(%identity, "Profile created.");

				Ok(true)
			},
			Err(e) if e.kind == BackendErrorKind::UniqueViolation => {
				tracing::debug!(%identity, "Profile inserted concurrently; updating instead.");
				self.apply_patch(identity, session, patch).await?;

				Ok(false)
			},
			Err(e) => Err(e),
		}
	}

	async fn apply_patch(
		&self,
		identity: &IdentityId,
		session: &Session,
		patch: ProfilePatch,
	) -> Result<(), BackendError> {
		if patch.is_empty() {
			return Ok(());
		}

		self.inner.directory.update_profile(session, identity, patch).await?;

		Ok(())
	}

	async fn target_group(&self, snapshot: &OnboardingSnapshot) -> Option<GroupId> {
		match &snapshot.pending_group {
			Some(group) => Some(group.clone()),
			None => self.inner.marker.peek().await,
		}
	}

	async fn join_group(&self, identity: &IdentityId, session: &Session, group: &GroupId) -> bool {
		let directory = &self.inner.directory;

		match directory.membership_exists(session, group, identity).await {
			Ok(true) => return true,
			Ok(false) => {},
			Err(e) => tracing::warn!(%group, error = %e, "Membership check failed; inserting anyway."),
		}

		let membership = NewMembership {
			group_id: group.clone(),
			user_id: identity.clone(),
			role: MembershipRole::Member,
		};

		match directory.insert_membership(session, membership).await {
			Ok(()) => {
				tracing::info!(%identity, %group, "Joined group.");

				true
			},
			Err(e) if e.kind == BackendErrorKind::UniqueViolation => {
				if !self.inner.policy.verify_duplicate_membership {
					return true;
				}

				match directory.membership_exists(session, group, identity).await {
					Ok(confirmed) => {
						if !confirmed {
							tracing::warn!(%group, "Duplicate membership reported but not visible.");
						}

						confirmed
					},
					Err(e) => {
						tracing::debug!(%group, error = %e, "Duplicate membership re-read failed.");

						true
					},
				}
			},
			Err(e) => {
				tracing::warn!(%identity, %group, error = %e, "Group join failed; keeping invite.");

				false
			},
		}
	}
}
impl Debug for ProfileGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ProfileGuard")
			.field("policy", &self.inner.policy)
			.field("processing", &self.inner.processing.lock().len())
			.finish_non_exhaustive()
	}
}

struct GuardInner {
	identity: Arc<dyn IdentityClient>,
	directory: Arc<dyn ProfileDirectory>,
	marker: PendingJoinMarker,
	policy: GuardPolicy,
	processing: Mutex<HashSet<IdentityId>>,
}

struct ProcessingClaim<'a> {
	inner: &'a GuardInner,
	identity: IdentityId,
}
impl<'a> ProcessingClaim<'a> {
	fn acquire(inner: &'a GuardInner, identity: &IdentityId) -> Option<Self> {
		inner
			.processing
			.lock()
			.insert(identity.clone())
			.then(|| Self { inner, identity: identity.clone() })
	}
}
impl Drop for ProcessingClaim<'_> {
	fn drop(&mut self) {
		self.inner.processing.lock().remove(&self.identity);
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{_preludet::*, backend::Profile, store::MemoryStore};

	struct Fixture {
		guard: ProfileGuard,
		identity: Arc<FakeIdentity>,
		directory: Arc<FakeDirectory>,
		marker: PendingJoinMarker,
		session: Session,
	}

	fn fixture(policy: GuardPolicy) -> Fixture {
		let identity = Arc::new(FakeIdentity::default());
		let directory = Arc::new(FakeDirectory::default());
		let marker = PendingJoinMarker::new(Arc::new(MemoryStore::default()));
		let guard = ProfileGuard::new(identity.clone(), directory.clone(), marker.clone(), policy);
		let session = session_fixture("user-1", "refresh-1", Duration::hours(1));

		Fixture { guard, identity, directory, marker, session }
	}

	fn group(value: &str) -> GroupId {
		GroupId::new(value).expect("Group fixture should be valid.")
	}

	#[tokio::test]
	async fn new_profile_uses_the_backend_email() {
		let f = fixture(GuardPolicy::default());
		let snapshot = OnboardingSnapshot {
			name: Some("Ada".into()),
			birthday: Some(macros::date!(1990 - 04 - 01)),
			..Default::default()
		};

		f.identity.set_user_email(Some("auth@example.com"));

		let outcome = f
			.guard
			.ensure_profile_and_join(&f.session.identity, &f.session, &snapshot)
			.await
			.expect("Profile should be created.");

		assert!(outcome.profile_created);
		assert!(!outcome.joined_group);
		assert!(outcome.group_id.is_none());

		let profile = f.directory.profile(&f.session.identity).expect("Profile row should exist.");

		assert_eq!(profile.email.as_deref(), Some("auth@example.com"));
		assert!(profile.is_complete());
	}

	#[tokio::test]
	async fn empty_snapshot_does_not_touch_an_existing_profile() {
		let f = fixture(GuardPolicy::default());

		f.directory.seed_profile(Profile {
			id: f.session.identity.clone(),
			email: None,
			name: Some("Ada".into()),
			birthday: None,
			avatar_url: None,
		});

		let outcome = f
			.guard
			.ensure_profile_and_join(&f.session.identity, &f.session, &OnboardingSnapshot::default())
			.await
			.expect("Existing profile should be accepted.");

		assert!(!outcome.profile_created);
		assert_eq!(f.directory.profile_inserts(), 0);
		assert_eq!(f.directory.profile_updates(), 0);
	}

	#[tokio::test]
	async fn marker_group_is_joined_and_consumed() {
		let f = fixture(GuardPolicy::default());

		f.marker.record(&group("group-1")).await.expect("Marker should persist.");

		let outcome = f
			.guard
			.ensure_profile_and_join(&f.session.identity, &f.session, &OnboardingSnapshot::default())
			.await
			.expect("Join should succeed.");

		assert!(outcome.joined_group);
		assert_eq!(outcome.group_id, Some(group("group-1")));
		assert!(f.marker.peek().await.is_none());
		assert_eq!(f.directory.membership_inserts(), 1);
	}

	#[tokio::test]
	async fn unique_violation_counts_as_joined_after_confirmation() {
		let f = fixture(GuardPolicy::default());
		let snapshot =
			OnboardingSnapshot { pending_group: Some(group("group-1")), ..Default::default() };

		f.directory.seed_membership(&group("group-1"), &f.session.identity);
		f.directory.push_membership_exists(false);

		let outcome = f
			.guard
			.ensure_profile_and_join(&f.session.identity, &f.session, &snapshot)
			.await
			.expect("Duplicate membership should not fail.");

		assert!(outcome.joined_group);
		assert_eq!(f.directory.membership_count(), 1);
	}

	#[tokio::test]
	async fn unconfirmed_unique_violation_is_not_joined() {
		let f = fixture(GuardPolicy::default());

		f.marker.record(&group("group-1")).await.expect("Marker should persist.");
		f.directory.seed_membership(&group("group-1"), &f.session.identity);
		f.directory.push_membership_exists(false);
		f.directory.push_membership_exists(false);

		let outcome = f
			.guard
			.ensure_profile_and_join(&f.session.identity, &f.session, &OnboardingSnapshot::default())
			.await
			.expect("Duplicate membership should not fail.");

		assert!(!outcome.joined_group);
		assert_eq!(f.marker.peek().await, Some(group("group-1")));

		let trusting = fixture(GuardPolicy::default().with_verify_duplicate_membership(false));

		trusting.directory.seed_membership(&group("group-1"), &trusting.session.identity);
		trusting.directory.push_membership_exists(false);

		let outcome = trusting
			.guard
			.ensure_profile_and_join(
				&trusting.session.identity,
				&trusting.session,
				&OnboardingSnapshot { pending_group: Some(group("group-1")), ..Default::default() },
			)
			.await
			.expect("Duplicate membership should not fail.");

		assert!(outcome.joined_group);
	}

	#[tokio::test]
	async fn join_failure_keeps_the_marker() {
		let f = fixture(GuardPolicy::default());

		f.marker.record(&group("group-1")).await.expect("Marker should persist.");
		f.directory.fail_membership_inserts(Some(BackendErrorKind::Server { status: 503 }));

		let outcome = f
			.guard
			.ensure_profile_and_join(&f.session.identity, &f.session, &OnboardingSnapshot::default())
			.await
			.expect("Join failure is not fatal.");

		assert!(!outcome.joined_group);
		assert!(outcome.profile_created);
		assert_eq!(f.marker.peek().await, Some(group("group-1")));
	}

	#[tokio::test]
	async fn profile_failure_is_fatal() {
		let f = fixture(GuardPolicy::default());

		f.directory.fail_profile_reads(Some(BackendErrorKind::Network));

		let err = f
			.guard
			.ensure_profile_and_join(&f.session.identity, &f.session, &OnboardingSnapshot::default())
			.await
			.expect_err("Profile failure must surface.");

		assert!(matches!(err, Error::ProfileCreationFailed { .. }));
		assert!(!f.guard.is_processing(&f.session.identity));
	}

	#[tokio::test(start_paused = true)]
	async fn duplicate_call_waits_and_rereads() {
		let f = fixture(GuardPolicy::default());
		let snapshot =
			OnboardingSnapshot { pending_group: Some(group("group-1")), ..Default::default() };

		f.directory.set_delay(StdDuration::from_millis(250));

		let (first, second) = tokio::join!(
			f.guard.ensure_profile_and_join(&f.session.identity, &f.session, &snapshot),
			f.guard.ensure_profile_and_join(&f.session.identity, &f.session, &snapshot),
		);
		let first = first.expect("First call should succeed.");
		let second = second.expect("Duplicate call should succeed.");

		assert!(first.profile_created);
		assert!(!second.profile_created);
		assert!(first.joined_group && second.joined_group);
		assert_eq!(f.directory.profile_inserts(), 1);
		assert_eq!(f.directory.membership_inserts(), 1);
	}
}
