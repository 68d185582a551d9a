//! Session validity tracking with a post-rotation grace window.

// self
use crate::{_prelude::*, session::SessionManager};

impl SessionManager {
	/// Returns `true` when the session must be refreshed before use.
	///
	/// Uses the regular read budget; see [`SessionManager::is_expired_or_expiring_soon_within`].
	pub async fn is_expired_or_expiring_soon(&self) -> bool {
		self.is_expired_or_expiring_soon_within(self.inner.config.validity.session_read_timeout)
			.await
	}

	/// Same as [`SessionManager::is_expired_or_expiring_soon`] with a caller-chosen read budget.
	///
	/// A rotation confirmed within the grace window answers `false` without any I/O. When the
	/// persisted session cannot be read, an in-flight refresh answers `false` (defer to it);
	/// otherwise the session is assumed expired.
	pub async fn is_expired_or_expiring_soon_within(&self, read_budget: StdDuration) -> bool {
		let policy = &self.inner.config.validity;

		if self.rotated_within(policy.rotation_grace) {
			tracing::trace!("Recent rotation; skipping validity read.");

			return false;
		}

		match self.read_persisted(read_budget).await {
			Ok(Some(session)) => {
				let margin = Duration::try_from(policy.expiry_margin).unwrap_or(Duration::MAX);
				let expiring = session.expires_within(margin, OffsetDateTime::now_utc());

				*self.inner.cached.write() = Some(session);

				expiring
			},
			Ok(None) => !self.refresh_in_flight(),
			Err(e) => {
				let in_flight = self.refresh_in_flight();

				tracing::debug!(error = %e, in_flight, "Session read failed during validity check.");

				!in_flight
			},
		}
	}

	/// Returns `true` when a rotation was recorded less than `grace` ago.
	pub fn rotated_within(&self, grace: StdDuration) -> bool {
		self.inner.last_rotation.lock().is_some_and(|at| at.elapsed() < grace)
	}
}
