// crates.io
use futures::future;
// self
use session_continuity::{
	_preludet::*,
	auth::GroupId,
	backend::BackendErrorKind,
	config::GuardPolicy,
	profile::{OnboardingSnapshot, PendingJoinMarker, ProfileGuard},
	store::MemoryStore,
};

const CALLERS: usize = 5;

struct Fixture {
	guard: ProfileGuard,
	directory: Arc<FakeDirectory>,
	marker: PendingJoinMarker,
}

fn fixture() -> Fixture {
	let identity = Arc::new(FakeIdentity::default());
	let directory = Arc::new(FakeDirectory::default());
	let marker = PendingJoinMarker::new(Arc::new(MemoryStore::default()));
	let guard =
		ProfileGuard::new(identity, directory.clone(), marker.clone(), GuardPolicy::default());

	Fixture { guard, directory, marker }
}

fn group() -> GroupId {
	GroupId::new("group-1").expect("Group fixture should be valid.")
}

#[tokio::test(start_paused = true)]
async fn concurrent_sign_ins_write_one_profile_and_one_membership() {
	let f = fixture();
	let session = session_fixture("user-1", "refresh-1", Duration::hours(1));
	let snapshot = OnboardingSnapshot { name: Some("Ada".into()), ..Default::default() };

	f.directory.set_delay(StdDuration::from_millis(200));
	f.marker.record(&group()).await.expect("Marker should persist.");

	let outcomes = future::join_all((0..CALLERS).map(|_| {
		f.guard.ensure_profile_and_join(&session.identity, &session, &snapshot)
	}))
	.await;
	let outcomes = outcomes
		.into_iter()
		.map(|outcome| outcome.expect("Every caller should see the profile."))
		.collect::<Vec<_>>();

	assert_eq!(f.directory.profile_inserts(), 1);
	assert_eq!(f.directory.membership_inserts(), 1);
	assert_eq!(f.directory.membership_count(), 1);
	assert_eq!(outcomes.iter().filter(|outcome| outcome.profile_created).count(), 1);
	assert!(outcomes.iter().all(|outcome| outcome.joined_group));
	assert!(f.marker.peek().await.is_none());
	assert!(!f.guard.is_processing(&session.identity));
}

#[tokio::test]
async fn duplicate_membership_counts_as_joined() {
	let f = fixture();
	let session = session_fixture("user-1", "refresh-1", Duration::hours(1));
	let snapshot = OnboardingSnapshot { pending_group: Some(group()), ..Default::default() };

	f.directory.seed_membership(&group(), &session.identity);
	// The pre-check misses the row, so the insert hits the unique constraint.
	f.directory.push_membership_exists(false);

	let outcome = f
		.guard
		.ensure_profile_and_join(&session.identity, &session, &snapshot)
		.await
		.expect("Duplicate membership should not fail the call.");

	assert!(outcome.joined_group);
	assert_eq!(outcome.group_id, Some(group()));
	assert_eq!(f.directory.membership_count(), 1);
}

#[tokio::test]
async fn unreadable_directory_fails_profile_creation() {
	let f = fixture();
	let session = session_fixture("user-1", "refresh-1", Duration::hours(1));

	f.directory.fail_profile_reads(Some(BackendErrorKind::Server { status: 500 }));
	f.marker.record(&group()).await.expect("Marker should persist.");

	let err = f
		.guard
		.ensure_profile_and_join(&session.identity, &session, &OnboardingSnapshot::default())
		.await
		.expect_err("Profile failure must be fatal.");

	assert!(matches!(err, Error::ProfileCreationFailed { .. }));
	assert_eq!(f.directory.membership_inserts(), 0);
	assert_eq!(f.marker.peek().await, Some(group()));
}
