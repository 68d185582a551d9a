//! Secure credential vault gating silent and biometric session restores.
//!
//! The vault is the only component that reads or writes the long-lived refresh credential kept
//! for biometric login. The credential lives exclusively in a [`SecureStore`], leaves the vault
//! only as the argument of [`IdentityClient::refresh_session`], and is never logged.

pub mod prompt;

pub use prompt::*;

// self
use crate::{
	_prelude::*,
	auth::{IdentityId, Session, TokenSecret},
	backend::IdentityClient,
	error::TransientError,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::{KeyValueStore, SecureStore},
};

/// Secure-store key holding the refresh credential.
pub const REFRESH_TOKEN_KEY: &str = "biometric_refresh_token";
/// Secure-store key holding the identity the credential belongs to.
pub const IDENTITY_KEY: &str = "biometric_user_id";
/// Ordinary-store key holding the opt-in preference.
pub const PREFERENCE_KEY: &str = "biometric_enabled";
/// Budget of one credential exchange unless overridden.
pub const DEFAULT_EXCHANGE_TIMEOUT: StdDuration = StdDuration::from_secs(15);

/// Biometric-gated holder of the refresh credential.
#[derive(Clone)]
pub struct CredentialVault {
	inner: Arc<VaultInner>,
	exchange_timeout: StdDuration,
}
impl CredentialVault {
	/// Creates a vault over the provided stores, prompt, and identity backend.
	pub fn new(
		secure: Arc<dyn SecureStore>,
		preferences: Arc<dyn KeyValueStore>,
		prompt: Arc<dyn BiometricPrompt>,
		identity: Arc<dyn IdentityClient>,
	) -> Self {
		Self {
			inner: Arc::new(VaultInner {
				secure,
				preferences,
				prompt,
				identity,
				exchange: AsyncMutex::new(()),
			}),
			exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
		}
	}

	/// Overrides the budget of one credential exchange.
	pub fn with_exchange_timeout(mut self, timeout: StdDuration) -> Self {
		self.exchange_timeout = timeout;

		self
	}

	/// Stores the refresh credential and its identity.
	pub async fn save(&self, refresh_token: &TokenSecret, identity: &IdentityId) -> Result<()> {
		self.inner.secure.set(REFRESH_TOKEN_KEY, refresh_token.expose().to_owned()).await?;
		self.inner.secure.set(IDENTITY_KEY, identity.to_string()).await?;

		tracing::debug!(%identity, "Stored biometric credential.");

		Ok(())
	}

	/// Saves the session's refresh credential when the user opted in; returns whether it did.
	pub async fn remember(&self, session: &Session) -> Result<bool> {
		if !self.is_enabled().await {
			return Ok(false);
		}

		self.save(&session.refresh_token, &session.identity).await?;

		Ok(true)
	}

	/// Returns `true` when both the credential and its identity are stored.
	pub async fn has_credentials(&self) -> bool {
		match self.read_record().await {
			Ok(record) => record.is_some(),
			Err(e) => {
				tracing::warn!(error = %e, "Biometric credential could not be read.");

				false
			},
		}
	}

	/// Identity the stored credential belongs to.
	pub async fn stored_identity(&self) -> Option<IdentityId> {
		let raw = self.inner.secure.get(IDENTITY_KEY).await.ok().flatten()?;

		IdentityId::new(raw).ok()
	}

	/// Removes the stored credential; failures are logged and otherwise ignored.
	pub async fn clear(&self) {
		for key in [REFRESH_TOKEN_KEY, IDENTITY_KEY] {
			if let Err(e) = self.inner.secure.remove(key).await {
				tracing::warn!(key, error = %e, "Failed to clear biometric credential.");
			}
		}
	}

	/// Reads the opt-in preference; unreadable preferences count as disabled.
	pub async fn is_enabled(&self) -> bool {
		match self.inner.preferences.get(PREFERENCE_KEY).await {
			Ok(value) => value.as_deref() == Some("true"),
			Err(e) => {
				tracing::warn!(error = %e, "Biometric preference could not be read.");

				false
			},
		}
	}

	/// Persists the opt-in preference; opting out also clears the stored credential.
	pub async fn set_enabled(&self, enabled: bool) -> Result<()> {
		self.inner.preferences.set(PREFERENCE_KEY, enabled.to_string()).await?;

		if !enabled {
			self.clear().await;
		}

		Ok(())
	}

	/// Hardware, enrollment, and modality of the device.
	pub async fn availability(&self) -> BiometricAvailability {
		self.inner.prompt.availability().await
	}

	/// Exchanges the stored credential for a fresh session without prompting.
	///
	/// A missing record, a rejected credential, or a session for another identity clears the
	/// vault and fails with [`Error::InvalidCredential`]. Transient failures keep the record.
	pub async fn restore_silently(&self) -> Result<Session> {
		let span = FlowSpan::new(FlowKind::SilentRestore, "restore_silently");

		obs::record_flow_outcome(FlowKind::SilentRestore, FlowOutcome::Attempt);

		let result = span.instrument(self.exchange_stored()).await;

		obs::record_flow_outcome(FlowKind::SilentRestore, FlowOutcome::of(&result));

		result
	}

	/// Prompts for biometrics, then performs [`CredentialVault::restore_silently`].
	pub async fn authenticate_and_restore(&self, reason: &str) -> Result<Session> {
		if !self.availability().await.is_available() {
			return Err(Error::NoHardware);
		}
		if !self.has_credentials().await {
			return Err(Error::InvalidCredential {
				reason: "No biometric credential is stored".into(),
			});
		}

		match self.inner.prompt.authenticate(reason).await {
			PromptOutcome::Success => self.restore_silently().await,
			PromptOutcome::Cancelled => Err(Error::UserCancelled),
			PromptOutcome::Failed(reason) => Err(Error::BiometricRejected { reason }),
		}
	}

	async fn read_record(&self) -> Result<Option<(TokenSecret, IdentityId)>> {
		let token = self.inner.secure.get(REFRESH_TOKEN_KEY).await?;
		let identity = self.inner.secure.get(IDENTITY_KEY).await?;

		Ok(match (token, identity) {
			(Some(token), Some(identity)) if !token.trim().is_empty() =>
				IdentityId::new(identity).ok().map(|identity| (TokenSecret::new(token), identity)),
			_ => None,
		})
	}

	async fn exchange_stored(&self) -> Result<Session> {
		let _exchange = self.inner.exchange.lock().await;
		let Some((token, expected)) = self.read_record().await? else {
			self.clear().await;

			return Err(Error::InvalidCredential {
				reason: "No biometric credential is stored".into(),
			});
		};

		let budget = self.exchange_timeout;
		let Ok(outcome) =
			tokio::time::timeout(budget, self.inner.identity.refresh_session(&token)).await
		else {
			tracing::warn!(?budget, "Credential exchange timed out; keeping the stored record.");

			return Err(TransientError::NetworkTimeout {
				operation: "restore_silently",
				after: Some(budget),
			}
			.into());
		};

		match outcome {
			Ok(session) if session.identity != expected => {
				tracing::warn!(
					%expected,
					actual = %session.identity,
					"Restored session belongs to another identity; clearing vault."
				);
				self.clear().await;

				Err(Error::InvalidCredential {
					reason: "Stored credential belongs to another identity".into(),
				})
			},
			Ok(session) => {
				if let Err(e) = self.save(&session.refresh_token, &session.identity).await {
					tracing::warn!(error = %e, "Rotated credential could not be stored.");
				}

				tracing::info!(identity = %session.identity, "Session restored from vault.");

				Ok(session)
			},
			Err(e) if e.kind.is_credential_rejection() => {
				tracing::info!(error = %e, "Stored credential was rejected; clearing vault.");
				self.clear().await;

				Err(Error::InvalidCredential { reason: e.message })
			},
			Err(e) => Err(e.into()),
		}
	}
}
impl Debug for CredentialVault {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialVault")
			.field("exchange_timeout", &self.exchange_timeout)
			.finish_non_exhaustive()
	}
}

struct VaultInner {
	secure: Arc<dyn SecureStore>,
	preferences: Arc<dyn KeyValueStore>,
	prompt: Arc<dyn BiometricPrompt>,
	identity: Arc<dyn IdentityClient>,
	exchange: AsyncMutex<()>,
}
