//! Single-flight refresh coordinator with bounded retries and layered fallbacks.

// std
use std::sync::atomic::Ordering;
// crates.io
use futures::{
	FutureExt,
	future::{BoxFuture, Shared},
};
// self
use crate::{
	_prelude::*,
	auth::{Session, TokenSecret},
	backend::{BackendError, BackendErrorKind},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	session::SessionManager,
};

pub(crate) type SharedRefresh = Shared<BoxFuture<'static, bool>>;

pub(crate) struct Flight {
	id: u64,
	outcome: SharedRefresh,
}

impl SessionManager {
	/// Returns `true` once the caller may proceed with a usable session.
	///
	/// Concurrent callers share one flight: at most one network refresh runs per manager, and
	/// every caller observes the same outcome. `false` means the user must sign in again.
	pub async fn ensure_valid_session(&self) -> bool {
		if let Some(outcome) = self.joinable_flight() {
			self.inner.metrics.record_joined();
			tracing::debug!("Joining in-flight refresh.");

			return outcome.await;
		}
		if !self.is_expired_or_expiring_soon().await {
			// A flight may have started during the read; its outcome is the answer.
			if let Some(outcome) = self.joinable_flight() {
				self.inner.metrics.record_joined();

				return outcome.await;
			}

			return true;
		}

		self.start_or_join_flight().await
	}

	/// Returns `true` while a refresh flight is running.
	pub fn refresh_in_flight(&self) -> bool {
		self.inner.flight.lock().is_some()
	}

	fn joinable_flight(&self) -> Option<SharedRefresh> {
		self.inner.flight.lock().as_ref().map(|flight| flight.outcome.clone())
	}

	fn start_or_join_flight(&self) -> SharedRefresh {
		let mut slot = self.inner.flight.lock();

		if let Some(flight) = slot.as_ref() {
			self.inner.metrics.record_joined();

			return flight.outcome.clone();
		}

		let id = self.inner.next_flight.fetch_add(1, Ordering::Relaxed);
		let manager = self.clone();
		let outcome = async move {
			let _release = FlightRelease { manager: &manager, id };

			manager.run_flight().await
		}
		.boxed()
		.shared();

		self.inner.metrics.record_flight();
		*slot = Some(Flight { id, outcome: outcome.clone() });

		outcome
	}

	async fn run_flight(&self) -> bool {
		let span = FlowSpan::new(FlowKind::Refresh, "ensure_valid_session");

		obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Attempt);

		let recovered = span.instrument(self.refresh_or_recover()).await;

		if recovered {
			self.inner.metrics.record_success();
			obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Success);
		} else {
			self.inner.metrics.record_failure();
			obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::Failure);
		}

		recovered
	}

	async fn refresh_or_recover(&self) -> bool {
		let read_budget = self.inner.config.validity.session_read_timeout;
		let cached_token = self.current_session().map(|session| session.refresh_token);
		let refresh_token = match cached_token {
			Some(token) => Some(token),
			None => match self.read_persisted(read_budget).await {
				Ok(persisted) => persisted.map(|session| session.refresh_token),
				Err(e) => {
					tracing::debug!(error = %e, "Persisted session unavailable before refresh.");

					None
				},
			},
		};

		if let Some(token) = refresh_token {
			match self.refresh_with_retry(&token).await {
				Ok(session) => {
					tracing::info!(identity = %session.identity, "Session refreshed.");
					self.adopt_session(session).await;

					return true;
				},
				Err(e) => tracing::warn!(error = %e, "Session refresh failed; trying fallbacks."),
			}
		} else {
			tracing::debug!("No refresh credential available; trying fallbacks.");
		}

		// Backend writes can lag behind a successful rotation elsewhere.
		match self.read_persisted(read_budget).await {
			Ok(Some(session)) if !session.is_expired() => {
				tracing::info!("Accepting unexpired persisted session after refresh failure.");
				*self.inner.cached.write() = Some(session);

				return true;
			},
			Ok(_) => {},
			Err(e) => tracing::debug!(error = %e, "Persisted session re-check failed."),
		}

		if let Some(vault) = self.vault() {
			if vault.has_credentials().await {
				match vault.restore_silently().await {
					Ok(session) => {
						self.adopt_session(session).await;

						return true;
					},
					Err(e) => tracing::warn!(error = %e, "Silent restore failed."),
				}
			}
		}

		tracing::warn!("No usable session; re-authentication required.");
		*self.inner.cached.write() = None;

		false
	}

	async fn refresh_with_retry(&self, token: &TokenSecret) -> Result<Session, BackendError> {
		let policy = &self.inner.config.refresh;
		let mut attempt = 0;

		loop {
			let budget = policy.attempt_timeout(attempt);

			self.inner.metrics.record_network_call();

			let outcome =
				match tokio::time::timeout(budget, self.inner.identity.refresh_session(token)).await
				{
					Ok(outcome) => outcome,
					Err(_) => Err(BackendError::new(
						"refresh_session",
						BackendErrorKind::Timeout,
						format!("No response within {budget:?}"),
					)),
				};

			match outcome {
				Ok(session) => return Ok(session),
				Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
					let delay = policy.backoff(attempt);

					tracing::warn!(attempt, ?delay, error = %e, "Refresh attempt failed; retrying.");
					tokio::time::sleep(delay).await;

					attempt += 1;
				},
				Err(e) => return Err(e),
			}
		}
	}
}

struct FlightRelease<'a> {
	manager: &'a SessionManager,
	id: u64,
}
impl Drop for FlightRelease<'_> {
	fn drop(&mut self) {
		let finished = {
			let mut slot = self.manager.inner.flight.lock();

			if slot.as_ref().is_some_and(|flight| flight.id == self.id) { slot.take() } else { None }
		};

		// Dropped outside the lock; the handle may be the last reference to the flight.
		drop(finished);
	}
}
