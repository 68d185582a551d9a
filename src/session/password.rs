//! Password sign-in that falls through to registration for unknown addresses.

// self
use crate::{
	_prelude::*,
	auth::{IdentityId, Session},
	backend::{BackendErrorKind, SignUpOutcome},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	session::SessionManager,
};

/// Result of [`SessionManager::sign_in_or_register`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PasswordOutcome {
	/// Existing account signed in.
	SignedIn(Session),
	/// New account created and signed in.
	Registered(Session),
	/// New account created; the address must be confirmed before signing in.
	ConfirmationRequired {
		/// Identity id of the new account.
		identity: IdentityId,
	},
}
impl PasswordOutcome {
	/// Session established by the call, if any.
	pub fn session(&self) -> Option<&Session> {
		match self {
			PasswordOutcome::SignedIn(session) | PasswordOutcome::Registered(session) =>
				Some(session),
			PasswordOutcome::ConfirmationRequired { .. } => None,
		}
	}
}

impl SessionManager {
	/// Signs in with a password, registering the address when no account matches.
	///
	/// An address that is already registered but rejected the password fails with
	/// [`Error::InvalidCredential`]. Any established session is adopted.
	pub async fn sign_in_or_register(&self, email: &str, password: &str) -> Result<PasswordOutcome> {
		let email = email.trim();

		if email.is_empty() || password.is_empty() {
			return Err(Error::InvalidCredential {
				reason: "Email and password are required".into(),
			});
		}

		let span = FlowSpan::new(FlowKind::PasswordSignIn, "sign_in_or_register");

		obs::record_flow_outcome(FlowKind::PasswordSignIn, FlowOutcome::Attempt);

		let result = span.instrument(self.password_flow(email, password)).await;

		obs::record_flow_outcome(FlowKind::PasswordSignIn, FlowOutcome::of(&result));

		result
	}

	async fn password_flow(&self, email: &str, password: &str) -> Result<PasswordOutcome> {
		let identity = self.identity();

		match identity.sign_in_with_password(email, password).await {
			Ok(session) => {
				self.adopt_session(session.clone()).await;

				return Ok(PasswordOutcome::SignedIn(session));
			},
			Err(e) if e.kind == BackendErrorKind::InvalidGrant => {
				tracing::debug!("Password sign-in rejected; attempting registration.");
			},
			Err(e) => return Err(e.into()),
		}

		match identity.sign_up(email, password).await {
			Ok(SignUpOutcome::SignedIn(session)) => {
				self.adopt_session(session.clone()).await;

				Ok(PasswordOutcome::Registered(session))
			},
			Ok(SignUpOutcome::ConfirmationRequired { identity }) =>
				Ok(PasswordOutcome::ConfirmationRequired { identity }),
			Err(e) if e.kind == BackendErrorKind::AlreadyRegistered =>
				Err(Error::InvalidCredential { reason: "Incorrect password".into() }),
			Err(e) => Err(e.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, config::EngineConfig};

	#[tokio::test]
	async fn known_account_signs_in() {
		let harness = build_test_harness(EngineConfig::default());

		harness
			.identity
			.set_password_result(Ok(session_fixture("user-1", "refresh-1", Duration::hours(1))));

		let outcome = harness
			.manager
			.sign_in_or_register(" a@example.com ", "secret")
			.await
			.expect("Sign-in should succeed.");

		assert!(matches!(outcome, PasswordOutcome::SignedIn(_)));
		assert!(harness.manager.current_session().is_some());
	}

	#[tokio::test]
	async fn unknown_account_registers_or_awaits_confirmation() {
		let harness = build_test_harness(EngineConfig::default());

		harness.identity.set_password_result(Err(BackendErrorKind::InvalidGrant));
		harness.identity.set_sign_up_result(Ok(SignUpOutcome::ConfirmationRequired {
			identity: IdentityId::new("user-9").expect("Identity fixture should be valid."),
		}));

		let outcome = harness
			.manager
			.sign_in_or_register("new@example.com", "secret")
			.await
			.expect("Registration should succeed.");

		assert!(matches!(outcome, PasswordOutcome::ConfirmationRequired { .. }));
		assert!(outcome.session().is_none());
		assert!(harness.manager.current_session().is_none());
	}

	#[tokio::test]
	async fn registered_address_with_wrong_password_is_rejected() {
		let harness = build_test_harness(EngineConfig::default());

		harness.identity.set_password_result(Err(BackendErrorKind::InvalidGrant));
		harness.identity.set_sign_up_result(Err(BackendErrorKind::AlreadyRegistered));

		let err = harness
			.manager
			.sign_in_or_register("a@example.com", "wrong")
			.await
			.expect_err("Wrong password must fail.");

		assert!(matches!(err, Error::InvalidCredential { .. }));
	}
}
