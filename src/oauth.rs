//! OAuth redirect resolution: authorize URL construction, callback classification, and the
//! confirmation race that turns redirect tokens into a usable session.

pub mod authorize;
pub mod callback;
pub mod race;

pub use authorize::{AuthorizationAttempt, AuthorizeRequest};
pub use callback::{CallbackPayload, is_oauth_callback, parse_callback};

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use futures::{
	FutureExt,
	future::{BoxFuture, Either},
};
use tokio::task::JoinHandle;
// self
use crate::{
	_prelude::*,
	auth::{Session, TokenSecret},
	config::OAuthPolicy,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	oauth::race::RaceOutcome,
	session::SessionManager,
};

/// Progress of the browser sign-in handled by an [`OAuthResolver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolverState {
	/// No sign-in is pending.
	Idle,
	/// The browser was opened; the redirect must arrive before `deadline`.
	AwaitingRedirect {
		/// Absolute deadline of the attempt.
		deadline: Instant,
	},
	/// Tokens were read from the redirect and are being confirmed.
	TokenExtracted,
	/// The session was confirmed and adopted.
	Confirmed,
	/// The attempt ended with an error.
	Failed,
}

/// Resolves OAuth redirects into sessions adopted by a [`SessionManager`].
///
/// At most one callback is processed at a time; a second one arriving meanwhile fails fast with
/// [`Error::CallbackInProgress`].
#[derive(Clone)]
pub struct OAuthResolver {
	inner: Arc<ResolverInner>,
}
impl OAuthResolver {
	/// Creates a resolver that adopts confirmed sessions into `manager`.
	pub fn new(manager: SessionManager) -> Self {
		Self {
			inner: Arc::new(ResolverInner {
				manager,
				state: Mutex::new(ResolverState::Idle),
				last_terminal: Mutex::new(None),
				pending: Mutex::new(None),
				processing: AtomicBool::new(false),
			}),
		}
	}

	/// Current state.
	pub fn state(&self) -> ResolverState {
		self.inner.state.lock().clone()
	}

	/// Terminal state reached by the last [`OAuthResolver::resolve`] call.
	pub fn last_terminal(&self) -> Option<ResolverState> {
		self.inner.last_terminal.lock().clone()
	}

	/// Starts a browser sign-in and returns the URL to open.
	pub fn begin(&self, request: &AuthorizeRequest) -> AuthorizationAttempt {
		let deadline = Instant::now() + self.inner.manager.config().oauth.attempt_deadline;
		let attempt = AuthorizationAttempt::build(request, deadline);

		tracing::debug!(provider = %request.provider, "OAuth attempt started.");
		*self.inner.pending.lock() = Some(attempt.clone());
		self.set_state(ResolverState::AwaitingRedirect { deadline });

		attempt
	}

	/// Resolves a redirect URL into a confirmed session.
	///
	/// Provider errors are classified before any token is read. Tokens are confirmed by racing
	/// `set_session` against polling the backend's persisted session; codes are exchanged with
	/// the pending PKCE verifier. The confirmed session is adopted by the manager.
	pub async fn resolve(&self, callback_url: &str) -> Result<Session> {
		let Some(_latch) = ProcessingLatch::acquire(&self.inner.processing) else {
			tracing::debug!("Callback already in progress; rejecting duplicate.");

			return Err(Error::CallbackInProgress);
		};
		let span = FlowSpan::new(FlowKind::OAuthCallback, "resolve");

		obs::record_flow_outcome(FlowKind::OAuthCallback, FlowOutcome::Attempt);

		let outcome = span.instrument(self.resolve_callback(callback_url)).await;
		let result = match outcome {
			Ok(session) => {
				self.settle(ResolverState::Confirmed);

				Ok(session)
			},
			Err(Rejection::Stray(e)) => {
				tracing::warn!(error = %e, "Ignoring callback for another attempt.");

				Err(e)
			},
			Err(Rejection::Failed(e)) => {
				tracing::warn!(error = %e, "OAuth callback failed.");
				self.settle(ResolverState::Failed);

				Err(e)
			},
		};

		obs::record_flow_outcome(FlowKind::OAuthCallback, FlowOutcome::of(&result));

		result
	}

	/// Forgets any pending attempt and terminal state.
	pub fn reset(&self) {
		*self.inner.pending.lock() = None;
		*self.inner.last_terminal.lock() = None;
		self.set_state(ResolverState::Idle);
	}

	fn set_state(&self, state: ResolverState) {
		*self.inner.state.lock() = state;
	}

	fn settle(&self, terminal: ResolverState) {
		*self.inner.last_terminal.lock() = Some(terminal);
		*self.inner.pending.lock() = None;
		self.set_state(ResolverState::Idle);
	}

	async fn resolve_callback(&self, callback_url: &str) -> Result<Session, Rejection> {
		let payload = callback::parse_callback(callback_url)?;

		if let CallbackPayload::Error { code, description } = payload {
			return Err(callback::classify_error(code, description).into());
		}

		let attempt = self.inner.pending.lock().clone();

		if let Some(attempt) = &attempt {
			if !attempt.accepts_state(payload.state()) {
				return Err(Rejection::Stray(Error::InvalidCallback {
					reason: "State does not match the pending attempt".into(),
				}));
			}
		}

		let deadline = match &attempt {
			Some(attempt) => attempt.deadline,
			None => Instant::now() + self.inner.manager.config().oauth.attempt_deadline,
		};

		if Instant::now() >= deadline {
			return Err(Error::CallbackExpired.into());
		}

		let session = match payload {
			CallbackPayload::Tokens { access_token, refresh_token, .. } => {
				self.set_state(ResolverState::TokenExtracted);
				self.confirm_tokens(access_token, refresh_token, deadline).await?
			},
			CallbackPayload::Code { code, .. } => {
				let attempt = attempt.ok_or_else(|| Error::InvalidCallback {
					reason: "Authorization code arrived without a pending attempt".into(),
				})?;

				self.set_state(ResolverState::TokenExtracted);
				self.exchange_code(&code, &attempt, deadline).await?
			},
			CallbackPayload::Error { code, description } =>
				return Err(callback::classify_error(code, description).into()),
		};

		tracing::info!(identity = %session.identity, "OAuth session confirmed.");
		self.inner.manager.adopt_session(session.clone()).await;

		Ok(session)
	}

	async fn exchange_code(
		&self,
		code: &str,
		attempt: &AuthorizationAttempt,
		deadline: Instant,
	) -> Result<Session> {
		let identity = self.inner.manager.identity();

		match tokio::time::timeout_at(deadline, identity.exchange_code(code, attempt.verifier()))
			.await
		{
			Ok(result) => result.map_err(Error::from),
			Err(_) => Err(Error::CallbackExpired),
		}
	}

	async fn confirm_tokens(
		&self,
		access_token: TokenSecret,
		refresh_token: TokenSecret,
		deadline: Instant,
	) -> Result<Session> {
		let policy = self.inner.manager.config().oauth.clone();
		let installed = Arc::new(Mutex::new(None::<Installed>));
		let install = install_strategy(
			self.inner.manager.clone(),
			access_token.clone(),
			refresh_token,
			installed.clone(),
		);
		let poll = poll_strategy(self.inner.manager.clone(), access_token, installed, policy.clone());
		let budget_end = deadline.min(Instant::now() + policy.poll_budget());

		match tokio::time::timeout_at(budget_end, race::first_ok(install, poll)).await {
			Ok(RaceOutcome::Won { side, value, loser }) => {
				tracing::debug!(?side, "Confirmation strategy won.");

				if let Some(loser) = loser {
					drain_loser(loser, policy.loser_grace);
				}

				Ok(value)
			},
			Ok(RaceOutcome::Lost { left, right }) => {
				tracing::debug!(install = %left, poll = %right, "Both confirmation strategies failed.");

				if left.is_retryable() { Err(right) } else { Err(left) }
			},
			Err(_) => {
				let expired = Instant::now() >= deadline;

				tracing::warn!(expired, "Session confirmation ran out of time.");

				if expired {
					Err(Error::CallbackExpired)
				} else {
					Err(Error::SessionNotConfirmed { attempts: policy.poll_attempts })
				}
			},
		}
	}
}
impl Debug for OAuthResolver {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthResolver")
			.field("state", &*self.inner.state.lock())
			.field("processing", &self.inner.processing.load(Ordering::Acquire))
			.finish_non_exhaustive()
	}
}

struct ResolverInner {
	manager: SessionManager,
	state: Mutex<ResolverState>,
	last_terminal: Mutex<Option<ResolverState>>,
	pending: Mutex<Option<AuthorizationAttempt>>,
	processing: AtomicBool,
}

// A stray callback leaves the pending attempt and state untouched.
enum Rejection {
	Stray(Error),
	Failed(Error),
}
impl From<Error> for Rejection {
	fn from(e: Error) -> Self {
		Self::Failed(e)
	}
}

// Outcome of the `set_session` racer, visible to the polling racer.
#[derive(Clone)]
enum Installed {
	Confirmed(Session),
	Rejected(String),
}

struct ProcessingLatch<'a>(&'a AtomicBool);
impl<'a> ProcessingLatch<'a> {
	fn acquire(flag: &'a AtomicBool) -> Option<Self> {
		flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).ok().map(|_| Self(flag))
	}
}
impl Drop for ProcessingLatch<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::Release);
	}
}

struct AbortOnDrop<T>(JoinHandle<T>);
impl<T> Drop for AbortOnDrop<T> {
	fn drop(&mut self) {
		self.0.abort();
	}
}

// Installs the redirect tokens in a detached task; dropping the racer aborts the task.
fn install_strategy(
	manager: SessionManager,
	access_token: TokenSecret,
	refresh_token: TokenSecret,
	installed: Arc<Mutex<Option<Installed>>>,
) -> BoxFuture<'static, Result<Session>> {
	let task = tokio::spawn(async move {
		let result = manager
			.identity()
			.set_session(&access_token, &refresh_token)
			.await
			.map_err(Error::from);

		match &result {
			Ok(session) => *installed.lock() = Some(Installed::Confirmed(session.clone())),
			Err(Error::InvalidCredential { reason }) =>
				*installed.lock() = Some(Installed::Rejected(reason.clone())),
			Err(_) => {},
		}

		result
	});

	async move {
		let mut task = AbortOnDrop(task);

		match (&mut task.0).await {
			Ok(result) => result,
			Err(e) => Err(Error::Unexpected { message: format!("Session install task failed: {e}") }),
		}
	}
	.boxed()
}

// Polls the persisted session until it carries the redirect's access token, stopping early once
// the install racer settles.
fn poll_strategy(
	manager: SessionManager,
	access_token: TokenSecret,
	installed: Arc<Mutex<Option<Installed>>>,
	policy: OAuthPolicy,
) -> BoxFuture<'static, Result<Session>> {
	async move {
		let identity = manager.identity();

		for attempt in 1..=policy.poll_attempts {
			match installed.lock().clone() {
				Some(Installed::Confirmed(session)) => return Ok(session),
				Some(Installed::Rejected(reason)) => {
					tracing::debug!(attempt, "Redirect tokens were rejected; polling stops.");

					return Err(Error::InvalidCredential { reason });
				},
				None => {},
			}

			match identity.current_session().await {
				Ok(Some(session)) if session.access_token.expose() == access_token.expose() =>
					return Ok(session),
				Ok(_) => tracing::trace!(attempt, "Redirect session not persisted yet."),
				Err(e) => tracing::debug!(attempt, error = %e, "Session poll failed."),
			}

			if attempt < policy.poll_attempts {
				tokio::time::sleep(policy.poll_interval).await;
			}
		}

		Err(Error::SessionNotConfirmed { attempts: policy.poll_attempts })
	}
	.boxed()
}

fn drain_loser(loser: BoxFuture<'static, Result<Session>>, grace: StdDuration) {
	tokio::spawn(async move {
		match futures::future::select(loser, Box::pin(tokio::time::sleep(grace))).await {
			Either::Left((Ok(_), _)) => tracing::trace!("Losing strategy also confirmed."),
			Either::Left((Err(e), _)) => tracing::trace!(error = %e, "Losing strategy failed."),
			Either::Right(_) => tracing::trace!(?grace, "Losing strategy abandoned."),
		}
	});
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, backend::BackendErrorKind, config::EngineConfig};

	fn resolver(harness: &TestHarness) -> OAuthResolver {
		OAuthResolver::new(harness.manager.clone())
	}

	fn request() -> AuthorizeRequest {
		AuthorizeRequest::new(
			Url::parse("https://abc.example.co/auth/v1/authorize")
				.expect("Authorize endpoint fixture should parse."),
			"google",
			Url::parse("goodtimes://").expect("Redirect fixture should parse."),
		)
	}

	#[tokio::test(start_paused = true)]
	async fn access_denied_is_classified_before_extraction() {
		let harness = build_test_harness(EngineConfig::default());
		let resolver = resolver(&harness);
		let err = resolver
			.resolve(
				"goodtimes://?error=access_denied&error_description=Denied#access_token=a&refresh_token=r",
			)
			.await
			.expect_err("Denied callback must fail.");

		assert!(matches!(err, Error::AccessDenied { .. }));
		assert_eq!(harness.identity.set_session_calls(), 0);
		assert_eq!(resolver.last_terminal(), Some(ResolverState::Failed));
		assert_eq!(resolver.state(), ResolverState::Idle);
		assert!(harness.manager.current_session().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn installed_tokens_are_adopted() {
		let harness = build_test_harness(EngineConfig::default());
		let resolver = resolver(&harness);
		let session = resolver
			.resolve("goodtimes://#access_token=access-1&refresh_token=refresh-1&expires_in=3600")
			.await
			.expect("Token callback should resolve.");

		assert_eq!(session.refresh_token.expose(), "refresh-1");
		assert_eq!(harness.manager.current_session(), Some(session));
		assert!(harness.manager.rotated_within(StdDuration::from_secs(1)));
		assert_eq!(resolver.last_terminal(), Some(ResolverState::Confirmed));
	}

	#[tokio::test(start_paused = true)]
	async fn polling_confirms_when_install_hangs() {
		let harness = build_test_harness(EngineConfig::default());
		let resolver = resolver(&harness);
		let started = Instant::now();

		harness.identity.hang_set_session(true);
		harness
			.identity
			.set_current(Some(session_fixture("user-1", "refresh-1", Duration::hours(1))));

		let session = resolver
			.resolve("goodtimes://#access_token=access-refresh-1&refresh_token=refresh-1")
			.await
			.expect("Polling should confirm the session.");

		assert_eq!(session.identity.as_ref(), "user-1");
		assert!(started.elapsed() < StdDuration::from_secs(2));
	}

	#[tokio::test(start_paused = true)]
	async fn unconfirmed_tokens_time_out_within_the_poll_budget() {
		let harness = build_test_harness(EngineConfig::default());
		let resolver = resolver(&harness);
		let started = Instant::now();

		harness.identity.hang_set_session(true);

		let err = resolver
			.resolve("goodtimes://#access_token=access-9&refresh_token=refresh-9")
			.await
			.expect_err("Unconfirmed tokens must fail.");

		assert!(matches!(err, Error::SessionNotConfirmed { .. }));
		assert!(err.is_retryable());
		assert!(started.elapsed() < StdDuration::from_secs(11));
		assert!(harness.manager.current_session().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn rejected_install_surfaces_the_credential_error() {
		let harness = build_test_harness(EngineConfig::default());

		harness.identity.set_set_session_result(Err(BackendErrorKind::InvalidGrant));

		let started = Instant::now();
		let err = resolver(&harness)
			.resolve("goodtimes://#access_token=access-9&refresh_token=refresh-9")
			.await
			.expect_err("Rejected tokens must fail.");

		assert!(matches!(err, Error::InvalidCredential { .. }));
		// Polling stops at its next tick instead of running out the budget.
		assert!(started.elapsed() <= StdDuration::from_secs(1));
	}

	#[tokio::test(start_paused = true)]
	async fn oversized_expiry_still_confirms() {
		let harness = build_test_harness(EngineConfig::default());
		let session = resolver(&harness)
			.resolve(
				"goodtimes://#access_token=access-1&refresh_token=refresh-1&expires_in=9223372036854775807",
			)
			.await
			.expect("Unrepresentable expiry should be ignored.");

		assert_eq!(session.access_token.expose(), "access-1");
	}

	#[tokio::test(start_paused = true)]
	async fn stray_state_keeps_the_pending_attempt() {
		let harness = build_test_harness(EngineConfig::default());
		let resolver = resolver(&harness);
		let attempt = resolver.begin(&request());

		harness
			.identity
			.set_exchange_result(Ok(session_fixture("user-3", "refresh-3", Duration::hours(1))));

		assert!(matches!(
			resolver.resolve("goodtimes://auth?code=forged&state=someone-else").await,
			Err(Error::InvalidCallback { .. })
		));
		assert!(matches!(resolver.state(), ResolverState::AwaitingRedirect { .. }));
		assert_eq!(resolver.last_terminal(), None);

		let session = resolver
			.resolve(&format!("goodtimes://auth?code=abc&state={}", attempt.state))
			.await
			.expect("Legitimate callback should still resolve.");

		assert_eq!(session.identity.as_ref(), "user-3");
		assert_eq!(harness.identity.exchange_calls(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn state_and_deadline_are_enforced() {
		let harness = build_test_harness(EngineConfig::default());
		let resolver = resolver(&harness);
		resolver.begin(&request());

		assert!(matches!(resolver.state(), ResolverState::AwaitingRedirect { .. }));
		assert!(matches!(
			resolver.resolve("goodtimes://?code=abc&state=forged").await,
			Err(Error::InvalidCallback { .. })
		));

		let state = resolver.begin(&request()).state;

		tokio::time::advance(StdDuration::from_secs(61)).await;

		assert!(matches!(
			resolver.resolve(&format!("goodtimes://?code=abc&state={state}")).await,
			Err(Error::CallbackExpired)
		));
		assert_eq!(harness.identity.exchange_calls(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn codes_are_exchanged_with_the_pending_verifier() {
		let harness = build_test_harness(EngineConfig::default());
		let resolver = resolver(&harness);
		let attempt = resolver.begin(&request());

		harness
			.identity
			.set_exchange_result(Ok(session_fixture("user-3", "refresh-3", Duration::hours(1))));

		let session = resolver
			.resolve(&format!("goodtimes://auth?code=abc&state={}", attempt.state))
			.await
			.expect("Code exchange should succeed.");

		assert_eq!(session.identity.as_ref(), "user-3");
		assert_eq!(
			harness.identity.last_exchange(),
			Some(("abc".to_owned(), attempt.verifier().to_owned()))
		);
		assert!(matches!(
			resolver.resolve("goodtimes://auth?code=again").await,
			Err(Error::InvalidCallback { .. })
		));
	}

	#[tokio::test(start_paused = true)]
	async fn concurrent_callbacks_are_rejected() {
		let harness = build_test_harness(EngineConfig::default());
		let resolver = resolver(&harness);

		harness.identity.hang_set_session(true);

		let first = tokio::spawn({
			let resolver = resolver.clone();

			async move { resolver.resolve("goodtimes://#access_token=a&refresh_token=r").await }
		});

		tokio::task::yield_now().await;

		assert_eq!(resolver.state(), ResolverState::TokenExtracted);
		assert!(matches!(
			resolver.resolve("goodtimes://#access_token=a&refresh_token=r").await,
			Err(Error::CallbackInProgress)
		));

		let first = first.await.expect("First callback task should join.");

		assert!(matches!(first, Err(Error::SessionNotConfirmed { .. })));
		assert_eq!(resolver.state(), ResolverState::Idle);
	}
}
