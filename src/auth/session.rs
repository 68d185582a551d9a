//! Authenticated session model, expiry arithmetic, and builder.

// self
use crate::{
	_prelude::*,
	auth::{IdentityId, TokenSecret},
};

/// Validity of a session relative to an instant and an expiry margin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
	/// Session is usable beyond the margin (or carries no expiry).
	Active,
	/// Session is still valid but expires within the margin.
	ExpiringSoon,
	/// Session expiry instant has passed.
	Expired,
}

/// Errors produced by [`SessionBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum SessionBuilderError {
	/// No access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// No refresh token value was provided.
	#[error("Refresh token is required.")]
	MissingRefreshToken,
	/// The relative expiry lands outside the representable calendar range.
	#[error("Expiry is out of range.")]
	ExpiryOutOfRange,
}

/// Access/refresh credential pair plus expiry issued by the identity backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
	/// Identity owning the session.
	pub identity: IdentityId,
	/// Access credential authorizing backend calls.
	pub access_token: TokenSecret,
	/// Long-lived credential used to mint new access tokens.
	pub refresh_token: TokenSecret,
	/// Expiry instant; `None` when the backend did not report one.
	#[serde(default, with = "time::serde::timestamp::option")]
	pub expires_at: Option<OffsetDateTime>,
	/// Email the backend associates with the identity, when included in the response.
	#[serde(default)]
	pub email: Option<String>,
}
impl Session {
	/// Returns a builder for the provided identity.
	pub fn builder(identity: IdentityId) -> SessionBuilder {
		SessionBuilder::new(identity)
	}

	/// Time left before expiry at `instant`; `None` when no expiry is known.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Option<Duration> {
		self.expires_at.map(|expires_at| expires_at - instant)
	}

	/// Returns `true` if the expiry instant has passed at `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.remaining_at(instant).is_some_and(|remaining| remaining <= Duration::ZERO)
	}

	/// Returns `true` if the session expires in less than `margin` after `instant`.
	pub fn expires_within(&self, margin: Duration, instant: OffsetDateTime) -> bool {
		self.remaining_at(instant).is_some_and(|remaining| remaining < margin)
	}

	/// Computes the status at `instant` for the given margin.
	pub fn status_at(&self, margin: Duration, instant: OffsetDateTime) -> SessionStatus {
		if self.is_expired_at(instant) {
			SessionStatus::Expired
		} else if self.expires_within(margin, instant) {
			SessionStatus::ExpiringSoon
		} else {
			SessionStatus::Active
		}
	}

	/// Convenience helper that checks expiry against the current UTC clock.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}
}
impl Debug for Session {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Session")
			.field("identity", &self.identity)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.field("email_set", &self.email.is_some())
			.finish()
	}
}

/// Builder for [`Session`].
#[derive(Clone, Debug)]
pub struct SessionBuilder {
	identity: IdentityId,
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	email: Option<String>,
}
impl SessionBuilder {
	fn new(identity: IdentityId) -> Self {
		Self {
			identity,
			access_token: None,
			refresh_token: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
			email: None,
		}
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the instant `expires_in` is measured from (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Attaches the backend-reported email.
	pub fn email(mut self, email: impl Into<String>) -> Self {
		self.email = Some(email.into());

		self
	}

	/// Consumes the builder and produces a [`Session`].
	pub fn build(self) -> Result<Session, SessionBuilderError> {
		let access_token = self
			.access_token
			.filter(|token| !token.is_blank())
			.ok_or(SessionBuilderError::MissingAccessToken)?;
		let refresh_token = self
			.refresh_token
			.filter(|token| !token.is_blank())
			.ok_or(SessionBuilderError::MissingRefreshToken)?;
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => Some(instant),
			(None, Some(delta)) => Some(
				self.issued_at
					.unwrap_or_else(OffsetDateTime::now_utc)
					.checked_add(delta)
					.ok_or(SessionBuilderError::ExpiryOutOfRange)?,
			),
			(None, None) => None,
		};

		Ok(Session {
			identity: self.identity,
			access_token,
			refresh_token,
			expires_at,
			email: self.email,
		})
	}
}
