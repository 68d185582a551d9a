//! Contracts for the remote identity backend and the relational profile directory.
//!
//! The engine never talks to the network directly; every remote call goes through
//! [`IdentityClient`] or [`ProfileDirectory`]. Implementations classify their failures into
//! [`BackendErrorKind`] so the engine can decide between retrying, falling back, and surfacing.

pub mod endpoint;
#[cfg(feature = "reqwest")] pub mod rest;

pub use endpoint::BackendEndpoint;

// self
use crate::{
	_prelude::*,
	auth::{GroupId, IdentityId, Session, TokenSecret},
};

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, BackendError>> + 'a + Send>>;

/// Classification attached to every [`BackendError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendErrorKind {
	/// Connection could not be established or was interrupted.
	Network,
	/// The call did not complete in time.
	Timeout,
	/// The backend failed on its side (5xx).
	Server {
		/// HTTP status code.
		status: u16,
	},
	/// Refresh token or credentials were rejected.
	InvalidGrant,
	/// Missing or expired access credential.
	Unauthorized,
	/// Authenticated but not allowed.
	Forbidden,
	/// Sign-up for an address that already has an account.
	AlreadyRegistered,
	/// Relational unique-constraint violation.
	UniqueViolation,
	/// Requested row does not exist.
	NotFound,
	/// Anything else.
	Other,
}
impl BackendErrorKind {
	/// Returns `true` for failures worth retrying with backoff.
	pub fn is_retryable(self) -> bool {
		matches!(self, Self::Network | Self::Timeout | Self::Server { .. })
	}

	/// Returns `true` when the backend rejected the presented credential.
	pub fn is_credential_rejection(self) -> bool {
		matches!(self, Self::InvalidGrant | Self::Unauthorized)
	}
}

/// Raw failure reported by a backend collaborator.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("{operation} failed ({kind:?}): {message}")]
pub struct BackendError {
	/// Operation label (for example `refresh_session`).
	pub operation: &'static str,
	/// Failure classification.
	pub kind: BackendErrorKind,
	/// Backend-supplied message.
	pub message: String,
}
impl BackendError {
	/// Creates a new backend error.
	pub fn new(operation: &'static str, kind: BackendErrorKind, message: impl Into<String>) -> Self {
		Self { operation, kind, message: message.into() }
	}

	/// Returns `true` for failures worth retrying with backoff.
	pub fn is_retryable(&self) -> bool {
		self.kind.is_retryable()
	}
}

/// Authenticated user details as reported by the identity backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUser {
	/// Identity id.
	pub id: IdentityId,
	/// Authoritative email address, when the account has one.
	pub email: Option<String>,
}

/// Result of a sign-up call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignUpOutcome {
	/// Account created and signed in immediately.
	SignedIn(Session),
	/// Account created; the address must be confirmed before a session is issued.
	ConfirmationRequired {
		/// Identity id of the new account.
		identity: IdentityId,
	},
}

/// Profile row stored in the relational directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
	/// Identity id (primary key).
	pub id: IdentityId,
	/// Contact email.
	#[serde(default)]
	pub email: Option<String>,
	/// Display name.
	#[serde(default)]
	pub name: Option<String>,
	/// Birthday.
	#[serde(default)]
	pub birthday: Option<time::Date>,
	/// Avatar image URL.
	#[serde(default)]
	pub avatar_url: Option<String>,
}
impl Profile {
	/// A profile is complete once both name and birthday are present.
	pub fn is_complete(&self) -> bool {
		self.name.as_deref().is_some_and(|name| !name.trim().is_empty()) && self.birthday.is_some()
	}
}

/// Row inserted when a profile is first created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProfile {
	/// Identity id.
	pub id: IdentityId,
	/// Email taken from the identity backend.
	pub email: Option<String>,
	/// Display name, when known.
	pub name: Option<String>,
	/// Birthday, when known.
	pub birthday: Option<time::Date>,
	/// Avatar image URL, when known.
	pub avatar_url: Option<String>,
}

/// Partial update applied to an existing profile; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
	/// New display name.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// New birthday.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub birthday: Option<time::Date>,
	/// New avatar image URL.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub avatar_url: Option<String>,
}
impl ProfilePatch {
	/// Returns `true` when the patch would not change anything.
	pub fn is_empty(&self) -> bool {
		self.name.is_none() && self.birthday.is_none() && self.avatar_url.is_none()
	}
}

/// Role recorded on a membership row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipRole {
	/// Regular member.
	#[default]
	Member,
	/// Group administrator.
	Admin,
}

/// Membership row linking an identity to a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMembership {
	/// Group id.
	pub group_id: GroupId,
	/// Identity id.
	pub user_id: IdentityId,
	/// Role within the group.
	pub role: MembershipRole,
}

/// Remote identity backend.
pub trait IdentityClient
where
	Self: Send + Sync,
{
	/// Reads the backend's persisted session, if any.
	fn current_session(&self) -> BackendFuture<'_, Option<Session>>;

	/// Exchanges a refresh token for a rotated session.
	fn refresh_session<'a>(&'a self, refresh_token: &'a TokenSecret)
	-> BackendFuture<'a, Session>;

	/// Installs an access/refresh pair received out of band (for example via an OAuth redirect).
	fn set_session<'a>(
		&'a self,
		access_token: &'a TokenSecret,
		refresh_token: &'a TokenSecret,
	) -> BackendFuture<'a, Session>;

	/// Exchanges an authorization code and PKCE verifier for a session.
	fn exchange_code<'a>(&'a self, code: &'a str, verifier: &'a str)
	-> BackendFuture<'a, Session>;

	/// Password sign-in.
	fn sign_in_with_password<'a>(
		&'a self,
		email: &'a str,
		password: &'a str,
	) -> BackendFuture<'a, Session>;

	/// Creates a new password account.
	fn sign_up<'a>(&'a self, email: &'a str, password: &'a str)
	-> BackendFuture<'a, SignUpOutcome>;

	/// Reads the authoritative user record for the session.
	fn fetch_user<'a>(&'a self, session: &'a Session) -> BackendFuture<'a, IdentityUser>;

	/// Revokes the session on the backend and forgets the persisted copy.
	fn sign_out<'a>(&'a self, session: &'a Session) -> BackendFuture<'a, ()>;
}

/// Relational directory holding profiles and group memberships.
pub trait ProfileDirectory
where
	Self: Send + Sync,
{
	/// Reads a profile row.
	fn fetch_profile<'a>(
		&'a self,
		session: &'a Session,
		id: &'a IdentityId,
	) -> BackendFuture<'a, Option<Profile>>;

	/// Inserts a profile row; a duplicate reports [`BackendErrorKind::UniqueViolation`].
	fn insert_profile<'a>(
		&'a self,
		session: &'a Session,
		profile: NewProfile,
	) -> BackendFuture<'a, Profile>;

	/// Applies a partial update to a profile row.
	fn update_profile<'a>(
		&'a self,
		session: &'a Session,
		id: &'a IdentityId,
		patch: ProfilePatch,
	) -> BackendFuture<'a, Profile>;

	/// Returns `true` when the membership row exists.
	fn membership_exists<'a>(
		&'a self,
		session: &'a Session,
		group: &'a GroupId,
		id: &'a IdentityId,
	) -> BackendFuture<'a, bool>;

	/// Inserts a membership row; a duplicate reports [`BackendErrorKind::UniqueViolation`].
	fn insert_membership<'a>(
		&'a self,
		session: &'a Session,
		membership: NewMembership,
	) -> BackendFuture<'a, ()>;

	/// Returns the first group the identity belongs to.
	fn first_membership<'a>(
		&'a self,
		session: &'a Session,
		id: &'a IdentityId,
	) -> BackendFuture<'a, Option<GroupId>>;
}
