//! Session manager owning the cached session, the rotation marker, and the refresh flight.
//!
//! [`SessionManager`] replaces process-wide singletons: every piece of shared mutable session
//! state lives inside one cloneable handle, which tests can build per case and [`reset`].
//!
//! [`reset`]: SessionManager::reset

pub mod events;
pub mod lifecycle;
pub mod metrics;
pub mod password;
pub mod refresh;
pub mod validity;

pub use events::AuthEvent;
pub use lifecycle::SessionLifecycle;
pub use metrics::RefreshMetrics;
pub use password::PasswordOutcome;

// std
use std::sync::atomic::AtomicU64;
// self
use crate::{
	_prelude::*,
	auth::Session,
	backend::IdentityClient,
	config::EngineConfig,
	error::TransientError,
	vault::CredentialVault,
};

/// Injectable owner of all session state shared across engine components.
#[derive(Clone)]
pub struct SessionManager {
	inner: Arc<ManagerInner>,
}
impl SessionManager {
	/// Creates a manager over the identity backend.
	pub fn new(identity: Arc<dyn IdentityClient>, config: EngineConfig) -> Self {
		Self {
			inner: Arc::new(ManagerInner {
				identity,
				vault: RwLock::new(None),
				config,
				cached: RwLock::new(None),
				last_rotation: Mutex::new(None),
				flight: Mutex::new(None),
				next_flight: AtomicU64::new(0),
				metrics: RefreshMetrics::default(),
			}),
		}
	}

	/// Attaches the credential vault used for silent restores and credential rotation.
	///
	/// The vault's exchanges are bounded by the first refresh attempt timeout.
	pub fn with_vault(self, vault: CredentialVault) -> Self {
		let timeout = self.inner.config.refresh.attempt_timeout(0);

		*self.inner.vault.write() = Some(vault.with_exchange_timeout(timeout));

		self
	}

	/// Identity backend the manager talks to.
	pub fn identity(&self) -> &Arc<dyn IdentityClient> {
		&self.inner.identity
	}

	/// Attached vault, if any.
	pub fn vault(&self) -> Option<CredentialVault> {
		self.inner.vault.read().clone()
	}

	/// Engine configuration.
	pub fn config(&self) -> &EngineConfig {
		&self.inner.config
	}

	/// Refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.inner.metrics
	}

	/// Last session confirmed or read by the manager.
	pub fn current_session(&self) -> Option<Session> {
		self.inner.cached.read().clone()
	}

	/// Ensures a usable session and returns it, or fails with [`Error::Unauthenticated`].
	pub async fn active_session(&self) -> Result<Session> {
		if !self.ensure_valid_session().await {
			return Err(Error::Unauthenticated);
		}
		if let Some(session) = self.current_session() {
			return Ok(session);
		}

		let session = self
			.read_persisted(self.inner.config.validity.session_read_timeout)
			.await?
			.ok_or(Error::Unauthenticated)?;

		*self.inner.cached.write() = Some(session.clone());

		Ok(session)
	}

	/// Records a session confirmed by any sign-in path.
	///
	/// Caches the session, marks a rotation (starting the validity grace window), and hands the
	/// refresh credential to the vault when the user opted into biometric login.
	pub async fn adopt_session(&self, session: Session) {
		*self.inner.cached.write() = Some(session.clone());
		self.mark_rotation();

		if let Some(vault) = self.vault() {
			if let Err(e) = vault.remember(&session).await {
				tracing::warn!(error = %e, "Biometric credential could not be updated.");
			}
		}
	}

	/// Signs out locally and, best-effort, on the backend.
	pub async fn sign_out(&self) {
		let session = self.inner.cached.write().take();

		*self.inner.last_rotation.lock() = None;

		if let Some(vault) = self.vault() {
			vault.clear().await;
		}

		let session = match session {
			Some(session) => Some(session),
			None => self
				.read_persisted(self.inner.config.validity.urgent_read_timeout)
				.await
				.ok()
				.flatten(),
		};

		if let Some(session) = session {
			if let Err(e) = self.inner.identity.sign_out(&session).await {
				tracing::warn!(error = %e, "Backend sign-out failed; local state already cleared.");
			}
		}

		tracing::info!("Signed out.");
	}

	/// Prompts for biometrics, exchanges the stored credential, and adopts the new session.
	pub async fn restore_with_biometrics(&self, reason: &str) -> Result<Session> {
		let vault = self.vault().ok_or_else(|| Error::InvalidCredential {
			reason: "Biometric login is not configured".into(),
		})?;
		let session = vault.authenticate_and_restore(reason).await?;

		self.adopt_session(session.clone()).await;

		Ok(session)
	}

	/// Drops all in-memory state so tests can reuse a manager.
	pub fn reset(&self) {
		*self.inner.cached.write() = None;
		*self.inner.last_rotation.lock() = None;

		let flight = self.inner.flight.lock().take();

		drop(flight);
		self.inner.metrics.reset();
	}

	pub(crate) fn mark_rotation(&self) {
		*self.inner.last_rotation.lock() = Some(Instant::now());
	}

	pub(crate) async fn read_persisted(&self, budget: StdDuration) -> Result<Option<Session>> {
		match tokio::time::timeout(budget, self.inner.identity.current_session()).await {
			Ok(result) => result.map_err(Error::from),
			Err(_) => Err(TransientError::NetworkTimeout {
				operation: "current_session",
				after: Some(budget),
			}
			.into()),
		}
	}
}
impl Debug for SessionManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionManager")
			.field("cached", &*self.inner.cached.read())
			.field("refresh_in_flight", &self.refresh_in_flight())
			.finish_non_exhaustive()
	}
}

struct ManagerInner {
	identity: Arc<dyn IdentityClient>,
	vault: RwLock<Option<CredentialVault>>,
	config: EngineConfig,
	cached: RwLock<Option<Session>>,
	last_rotation: Mutex<Option<Instant>>,
	flight: Mutex<Option<refresh::Flight>>,
	next_flight: AtomicU64,
	metrics: RefreshMetrics,
}
