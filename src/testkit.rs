//! Scripted in-memory collaborators for unit and integration tests.

// std
use std::collections::VecDeque;
// self
use crate::{
	_prelude::*,
	auth::{GroupId, IdentityId, Session, TokenSecret},
	backend::{
		BackendError, BackendErrorKind, BackendFuture, IdentityClient, IdentityUser,
		NewMembership, NewProfile, Profile, ProfileDirectory, ProfilePatch, SignUpOutcome,
	},
	vault::{BiometricAvailability, BiometricKind, BiometricPrompt, PromptFuture, PromptOutcome},
};

const DEFAULT_IDENTITY: &str = "user-1";

/// Builds a session for `identity` whose access token is `access-{refresh}`.
///
/// A negative `ttl` yields an already expired session.
pub fn session_fixture(identity: &str, refresh: &str, ttl: Duration) -> Session {
	Session::builder(IdentityId::new(identity).expect("Identity fixture should be valid."))
		.access_token(format!("access-{refresh}"))
		.refresh_token(refresh)
		.expires_at(OffsetDateTime::now_utc() + ttl)
		.build()
		.expect("Session fixture should build.")
}

fn scripted_error(operation: &'static str, kind: BackendErrorKind) -> BackendError {
	BackendError::new(operation, kind, format!("Scripted {operation} failure"))
}

async fn stall(hang: bool, delay: Option<StdDuration>) {
	if hang {
		std::future::pending::<()>().await;
	}
	if let Some(delay) = delay {
		tokio::time::sleep(delay).await;
	}
}

/// Scripted identity backend.
///
/// Unscripted refreshes succeed with a rotated session (`refresh-rotated-{n}`) for the identity
/// of the current session, or `user-1` when none is set. Every confirmed session becomes the
/// backend's current session, as a real client persisting it would.
#[derive(Debug, Default)]
pub struct FakeIdentity {
	state: Mutex<IdentityState>,
}
impl FakeIdentity {
	/// Replaces the persisted session.
	pub fn set_current(&self, session: Option<Session>) {
		self.state.lock().current = session;
	}

	/// Makes `current_session` fail with `kind` until reset with `None`.
	pub fn fail_current(&self, kind: Option<BackendErrorKind>) {
		self.state.lock().current_failure = kind;
	}

	/// Makes `current_session` never resolve.
	pub fn hang_current(&self, hang: bool) {
		self.state.lock().hang_current = hang;
	}

	/// Delays every `current_session` call.
	pub fn set_current_delay(&self, delay: StdDuration) {
		self.state.lock().current_delay = Some(delay);
	}

	/// Queues the result of the next `refresh_session` call.
	pub fn push_refresh(&self, result: Result<Session, BackendErrorKind>) {
		self.state.lock().refresh_results.push_back(result);
	}

	/// Makes `refresh_session` never resolve.
	pub fn hang_refreshes(&self, hang: bool) {
		self.state.lock().hang_refresh = hang;
	}

	/// Delays every `refresh_session` call.
	pub fn set_refresh_delay(&self, delay: StdDuration) {
		self.state.lock().refresh_delay = Some(delay);
	}

	/// Sets the result of every `set_session` call.
	pub fn set_set_session_result(&self, result: Result<Session, BackendErrorKind>) {
		self.state.lock().set_session_result = Some(result);
	}

	/// Makes `set_session` never resolve.
	pub fn hang_set_session(&self, hang: bool) {
		self.state.lock().hang_set_session = hang;
	}

	/// Delays every `set_session` call.
	pub fn set_set_session_delay(&self, delay: StdDuration) {
		self.state.lock().set_session_delay = Some(delay);
	}

	/// Sets the result of every `exchange_code` call.
	pub fn set_exchange_result(&self, result: Result<Session, BackendErrorKind>) {
		self.state.lock().exchange_result = Some(result);
	}

	/// Sets the result of every `sign_in_with_password` call.
	pub fn set_password_result(&self, result: Result<Session, BackendErrorKind>) {
		self.state.lock().password_result = Some(result);
	}

	/// Sets the result of every `sign_up` call.
	pub fn set_sign_up_result(&self, result: Result<SignUpOutcome, BackendErrorKind>) {
		self.state.lock().sign_up_result = Some(result);
	}

	/// Email reported by `fetch_user`; defaults to the session's email.
	pub fn set_user_email(&self, email: Option<&str>) {
		self.state.lock().user_email = Some(email.map(ToOwned::to_owned));
	}

	/// Number of `refresh_session` calls.
	pub fn refresh_calls(&self) -> usize {
		self.state.lock().refresh_calls
	}

	/// Number of `current_session` calls.
	pub fn current_session_calls(&self) -> usize {
		self.state.lock().current_calls
	}

	/// Number of `set_session` calls.
	pub fn set_session_calls(&self) -> usize {
		self.state.lock().set_session_calls
	}

	/// Number of `exchange_code` calls.
	pub fn exchange_calls(&self) -> usize {
		self.state.lock().exchanges.len()
	}

	/// Code and verifier of the last `exchange_code` call.
	pub fn last_exchange(&self) -> Option<(String, String)> {
		self.state.lock().exchanges.last().cloned()
	}

	/// Number of `sign_out` calls.
	pub fn sign_out_calls(&self) -> usize {
		self.state.lock().sign_out_calls
	}

	fn persist(&self, result: &Result<Session, BackendError>) {
		if let Ok(session) = result {
			self.state.lock().current = Some(session.clone());
		}
	}
}
impl IdentityClient for FakeIdentity {
	fn current_session(&self) -> BackendFuture<'_, Option<Session>> {
		Box::pin(async move {
			let (hang, delay) = {
				let mut state = self.state.lock();

				state.current_calls += 1;

				(state.hang_current, state.current_delay)
			};

			stall(hang, delay).await;

			let state = self.state.lock();

			match state.current_failure {
				Some(kind) => Err(scripted_error("current_session", kind)),
				None => Ok(state.current.clone()),
			}
		})
	}

	fn refresh_session<'a>(
		&'a self,
		_refresh_token: &'a TokenSecret,
	) -> BackendFuture<'a, Session> {
		Box::pin(async move {
			let (hang, delay, scripted, call, identity) = {
				let mut state = self.state.lock();

				state.refresh_calls += 1;

				let identity = state
					.current
					.as_ref()
					.map(|session| session.identity.to_string())
					.unwrap_or_else(|| DEFAULT_IDENTITY.into());

				(
					state.hang_refresh,
					state.refresh_delay,
					state.refresh_results.pop_front(),
					state.refresh_calls,
					identity,
				)
			};

			stall(hang, delay).await;

			let result = match scripted {
				Some(result) => result.map_err(|kind| scripted_error("refresh_session", kind)),
				None => Ok(session_fixture(
					&identity,
					&format!("refresh-rotated-{call}"),
					Duration::hours(1),
				)),
			};

			self.persist(&result);

			result
		})
	}

	fn set_session<'a>(
		&'a self,
		access_token: &'a TokenSecret,
		refresh_token: &'a TokenSecret,
	) -> BackendFuture<'a, Session> {
		Box::pin(async move {
			let (hang, delay, scripted) = {
				let mut state = self.state.lock();

				state.set_session_calls += 1;

				(state.hang_set_session, state.set_session_delay, state.set_session_result.clone())
			};

			stall(hang, delay).await;

			let result = match scripted {
				Some(result) => result.map_err(|kind| scripted_error("set_session", kind)),
				None => Session::builder(
					IdentityId::new(DEFAULT_IDENTITY).expect("Default identity should be valid."),
				)
				.access_token(access_token.expose())
				.refresh_token(refresh_token.expose())
				.expires_in(Duration::hours(1))
				.build()
				.map_err(|e| BackendError::new("set_session", BackendErrorKind::Other, e.to_string())),
			};

			self.persist(&result);

			result
		})
	}

	fn exchange_code<'a>(&'a self, code: &'a str, verifier: &'a str) -> BackendFuture<'a, Session> {
		Box::pin(async move {
			let scripted = {
				let mut state = self.state.lock();

				state.exchanges.push((code.to_owned(), verifier.to_owned()));
				state.exchange_result.clone()
			};
			let result = scripted
				.unwrap_or(Err(BackendErrorKind::InvalidGrant))
				.map_err(|kind| scripted_error("exchange_code", kind));

			self.persist(&result);

			result
		})
	}

	fn sign_in_with_password<'a>(
		&'a self,
		_email: &'a str,
		_password: &'a str,
	) -> BackendFuture<'a, Session> {
		Box::pin(async move {
			let scripted = self.state.lock().password_result.clone();
			let result = scripted
				.unwrap_or(Err(BackendErrorKind::InvalidGrant))
				.map_err(|kind| scripted_error("sign_in_with_password", kind));

			self.persist(&result);

			result
		})
	}

	fn sign_up<'a>(&'a self, _email: &'a str, _password: &'a str) -> BackendFuture<'a, SignUpOutcome> {
		Box::pin(async move {
			let scripted = self.state.lock().sign_up_result.clone();

			scripted
				.unwrap_or(Err(BackendErrorKind::Other))
				.map_err(|kind| scripted_error("sign_up", kind))
		})
	}

	fn fetch_user<'a>(&'a self, session: &'a Session) -> BackendFuture<'a, IdentityUser> {
		Box::pin(async move {
			let email = self.state.lock().user_email.clone().unwrap_or_else(|| session.email.clone());

			Ok(IdentityUser { id: session.identity.clone(), email })
		})
	}

	fn sign_out<'a>(&'a self, _session: &'a Session) -> BackendFuture<'a, ()> {
		Box::pin(async move {
			let mut state = self.state.lock();

			state.sign_out_calls += 1;
			state.current = None;

			Ok(())
		})
	}
}

#[derive(Debug, Default)]
struct IdentityState {
	current: Option<Session>,
	current_failure: Option<BackendErrorKind>,
	hang_current: bool,
	current_delay: Option<StdDuration>,
	current_calls: usize,
	refresh_results: VecDeque<Result<Session, BackendErrorKind>>,
	hang_refresh: bool,
	refresh_delay: Option<StdDuration>,
	refresh_calls: usize,
	set_session_result: Option<Result<Session, BackendErrorKind>>,
	hang_set_session: bool,
	set_session_delay: Option<StdDuration>,
	set_session_calls: usize,
	exchange_result: Option<Result<Session, BackendErrorKind>>,
	exchanges: Vec<(String, String)>,
	password_result: Option<Result<Session, BackendErrorKind>>,
	sign_up_result: Option<Result<SignUpOutcome, BackendErrorKind>>,
	user_email: Option<Option<String>>,
	sign_out_calls: usize,
}

/// Scripted biometric prompt; available and succeeding unless told otherwise.
#[derive(Debug)]
pub struct FakePrompt {
	state: Mutex<PromptState>,
}
impl FakePrompt {
	/// Toggles hardware availability.
	pub fn set_available(&self, available: bool) {
		self.state.lock().available = available;
	}

	/// Queues the outcome of the next prompt.
	pub fn push_outcome(&self, outcome: PromptOutcome) {
		self.state.lock().outcomes.push_back(outcome);
	}

	/// Number of prompts shown.
	pub fn prompts(&self) -> usize {
		self.state.lock().prompts
	}
}
impl Default for FakePrompt {
	fn default() -> Self {
		Self {
			state: Mutex::new(PromptState { available: true, outcomes: VecDeque::new(), prompts: 0 }),
		}
	}
}
impl BiometricPrompt for FakePrompt {
	fn availability(&self) -> PromptFuture<'_, BiometricAvailability> {
		Box::pin(async move {
			let available = self.state.lock().available;

			BiometricAvailability {
				has_hardware: available,
				is_enrolled: available,
				kind: if available { BiometricKind::Face } else { BiometricKind::None },
			}
		})
	}

	fn authenticate<'a>(&'a self, _reason: &'a str) -> PromptFuture<'a, PromptOutcome> {
		Box::pin(async move {
			let mut state = self.state.lock();

			state.prompts += 1;

			state.outcomes.pop_front().unwrap_or(PromptOutcome::Success)
		})
	}
}

#[derive(Debug)]
struct PromptState {
	available: bool,
	outcomes: VecDeque<PromptOutcome>,
	prompts: usize,
}

/// In-memory profile directory enforcing the same uniqueness as the relational schema.
#[derive(Debug, Default)]
pub struct FakeDirectory {
	state: Mutex<DirectoryState>,
}
impl FakeDirectory {
	/// Stores a profile row without counting it as an insert.
	pub fn seed_profile(&self, profile: Profile) {
		self.state.lock().profiles.insert(profile.id.clone(), profile);
	}

	/// Stores a membership row without counting it as an insert.
	pub fn seed_membership(&self, group: &GroupId, identity: &IdentityId) {
		self.state.lock().memberships.insert((group.clone(), identity.clone()));
	}

	/// Queues the answer of the next `membership_exists` call, overriding the stored rows.
	pub fn push_membership_exists(&self, exists: bool) {
		self.state.lock().membership_answers.push_back(exists);
	}

	/// Makes `insert_membership` fail with `kind` until reset with `None`.
	pub fn fail_membership_inserts(&self, kind: Option<BackendErrorKind>) {
		self.state.lock().membership_insert_failure = kind;
	}

	/// Makes `fetch_profile` fail with `kind` until reset with `None`.
	pub fn fail_profile_reads(&self, kind: Option<BackendErrorKind>) {
		self.state.lock().profile_read_failure = kind;
	}

	/// Delays every operation.
	pub fn set_delay(&self, delay: StdDuration) {
		self.state.lock().delay = Some(delay);
	}

	/// Stored profile row.
	pub fn profile(&self, identity: &IdentityId) -> Option<Profile> {
		self.state.lock().profiles.get(identity).cloned()
	}

	/// Number of stored membership rows.
	pub fn membership_count(&self) -> usize {
		self.state.lock().memberships.len()
	}

	/// Successful profile inserts.
	pub fn profile_inserts(&self) -> usize {
		self.state.lock().profile_inserts
	}

	/// Successful profile updates.
	pub fn profile_updates(&self) -> usize {
		self.state.lock().profile_updates
	}

	/// Successful membership inserts.
	pub fn membership_inserts(&self) -> usize {
		self.state.lock().membership_inserts
	}

	async fn pause(&self) {
		let delay = self.state.lock().delay;

		stall(false, delay).await;
	}
}
impl ProfileDirectory for FakeDirectory {
	fn fetch_profile<'a>(
		&'a self,
		_session: &'a Session,
		id: &'a IdentityId,
	) -> BackendFuture<'a, Option<Profile>> {
		Box::pin(async move {
			self.pause().await;

			let state = self.state.lock();

			match state.profile_read_failure {
				Some(kind) => Err(scripted_error("fetch_profile", kind)),
				None => Ok(state.profiles.get(id).cloned()),
			}
		})
	}

	fn insert_profile<'a>(
		&'a self,
		_session: &'a Session,
		profile: NewProfile,
	) -> BackendFuture<'a, Profile> {
		Box::pin(async move {
			self.pause().await;

			let mut state = self.state.lock();

			if state.profiles.contains_key(&profile.id) {
				return Err(scripted_error("insert_profile", BackendErrorKind::UniqueViolation));
			}

			let row = Profile {
				id: profile.id,
				email: profile.email,
				name: profile.name,
				birthday: profile.birthday,
				avatar_url: profile.avatar_url,
			};

			state.profiles.insert(row.id.clone(), row.clone());
			state.profile_inserts += 1;

			Ok(row)
		})
	}

	fn update_profile<'a>(
		&'a self,
		_session: &'a Session,
		id: &'a IdentityId,
		patch: ProfilePatch,
	) -> BackendFuture<'a, Profile> {
		Box::pin(async move {
			self.pause().await;

			let mut state = self.state.lock();
			let Some(row) = state.profiles.get_mut(id) else {
				return Err(scripted_error("update_profile", BackendErrorKind::NotFound));
			};

			if let Some(name) = patch.name {
				row.name = Some(name);
			}
			if let Some(birthday) = patch.birthday {
				row.birthday = Some(birthday);
			}
			if let Some(avatar_url) = patch.avatar_url {
				row.avatar_url = Some(avatar_url);
			}

			let row = row.clone();

			state.profile_updates += 1;

			Ok(row)
		})
	}

	fn membership_exists<'a>(
		&'a self,
		_session: &'a Session,
		group: &'a GroupId,
		id: &'a IdentityId,
	) -> BackendFuture<'a, bool> {
		Box::pin(async move {
			self.pause().await;

			let mut state = self.state.lock();
			let stored = state.memberships.contains(&(group.clone(), id.clone()));

			Ok(state.membership_answers.pop_front().unwrap_or(stored))
		})
	}

	fn insert_membership<'a>(
		&'a self,
		_session: &'a Session,
		membership: NewMembership,
	) -> BackendFuture<'a, ()> {
		Box::pin(async move {
			self.pause().await;

			let mut state = self.state.lock();

			if let Some(kind) = state.membership_insert_failure {
				return Err(scripted_error("insert_membership", kind));
			}
			if !state.memberships.insert((membership.group_id, membership.user_id)) {
				return Err(scripted_error("insert_membership", BackendErrorKind::UniqueViolation));
			}

			state.membership_inserts += 1;

			Ok(())
		})
	}

	fn first_membership<'a>(
		&'a self,
		_session: &'a Session,
		id: &'a IdentityId,
	) -> BackendFuture<'a, Option<GroupId>> {
		Box::pin(async move {
			self.pause().await;

			let state = self.state.lock();

			Ok(state
				.memberships
				.iter()
				.filter(|(_, member)| member == id)
				.map(|(group, _)| group.clone())
				.min())
		})
	}
}

#[derive(Debug, Default)]
struct DirectoryState {
	profiles: HashMap<IdentityId, Profile>,
	memberships: HashSet<(GroupId, IdentityId)>,
	membership_answers: VecDeque<bool>,
	membership_insert_failure: Option<BackendErrorKind>,
	profile_read_failure: Option<BackendErrorKind>,
	delay: Option<StdDuration>,
	profile_inserts: usize,
	profile_updates: usize,
	membership_inserts: usize,
}
