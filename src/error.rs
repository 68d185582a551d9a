//! Engine-level error types shared by the vault, session manager, OAuth resolver, and guard.

// self
use crate::{
	_prelude::*,
	backend::{BackendError, BackendErrorKind},
};

/// Engine-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical engine error exposed by public APIs.
///
/// Raw collaborator failures never escape; they are classified into one of these variants
/// before reaching callers.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// Stored or presented credential no longer exchanges for a session.
	#[error("Credential was rejected: {reason}.")]
	InvalidCredential {
		/// Backend- or engine-supplied reason string.
		reason: String,
	},
	/// The user declined the OAuth consent screen.
	#[error("The user denied access.")]
	AccessDenied {
		/// Provider-supplied description, when present.
		description: Option<String>,
	},
	/// The user dismissed the biometric prompt.
	#[error("Biometric prompt was cancelled.")]
	UserCancelled,
	/// No enrolled biometric hardware is available.
	#[error("Biometric hardware is unavailable or not enrolled.")]
	NoHardware,
	/// The biometric prompt completed without a match.
	#[error("Biometric authentication failed: {reason}.")]
	BiometricRejected {
		/// Platform-supplied reason string.
		reason: String,
	},
	/// The identity provider reported a configuration problem on its side.
	#[error("Identity provider is misconfigured: {description}.")]
	ServerMisconfiguration {
		/// Provider-supplied error code.
		code: String,
		/// Provider-supplied description, surfaced verbatim.
		description: String,
	},
	/// The OAuth redirect carried an error the engine does not recognize.
	#[error("OAuth sign-in failed with `{code}`.")]
	OAuth {
		/// Provider-supplied error code.
		code: String,
		/// Provider-supplied description, when present.
		description: Option<String>,
	},
	/// Another callback is already being processed.
	#[error("An OAuth callback is already being processed.")]
	CallbackInProgress,
	/// The callback URL cannot be used to establish a session.
	#[error("OAuth callback is invalid: {reason}.")]
	InvalidCallback {
		/// Human-readable reason.
		reason: String,
	},
	/// The absolute deadline for the login attempt elapsed.
	#[error("OAuth login attempt exceeded its deadline.")]
	CallbackExpired,
	/// Neither confirmation strategy observed a session within the poll budget.
	#[error("Session could not be confirmed after {attempts} checks.")]
	SessionNotConfirmed {
		/// Number of poll ticks performed.
		attempts: u32,
	},
	/// The operation needs an authenticated session and none is available.
	#[error("No authenticated session is available.")]
	Unauthenticated,
	/// The backend profile row could not be created or read; the user must not proceed.
	#[error("Profile could not be created: {reason}.")]
	ProfileCreationFailed {
		/// Human-readable reason.
		reason: String,
	},
	/// Backend failure that fits no other category.
	#[error("Backend returned an unexpected failure: {message}.")]
	Unexpected {
		/// Backend-supplied message.
		message: String,
	},
}
impl Error {
	/// Returns `true` when the caller may retry the same operation.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Self::Transient(_)
				| Self::Transport(_)
				| Self::CallbackExpired
				| Self::SessionNotConfirmed { .. }
				| Self::CallbackInProgress
		)
	}

	/// Returns `true` for outcomes where the user declined rather than something failing.
	pub fn is_user_declined(&self) -> bool {
		matches!(self, Self::AccessDenied { .. } | Self::UserCancelled)
	}
}
impl From<BackendError> for Error {
	fn from(e: BackendError) -> Self {
		match e.kind {
			BackendErrorKind::Timeout =>
				TransientError::NetworkTimeout { operation: e.operation, after: None }.into(),
			BackendErrorKind::Network => TransportError::Network { source: Box::new(e) }.into(),
			BackendErrorKind::Server { status } => TransientError::Backend {
				operation: e.operation,
				message: e.message,
				status: Some(status),
			}
			.into(),
			BackendErrorKind::InvalidGrant | BackendErrorKind::Unauthorized =>
				Self::InvalidCredential { reason: e.message },
			BackendErrorKind::Forbidden =>
				Self::AccessDenied { description: Some(e.message) },
			BackendErrorKind::AlreadyRegistered
			| BackendErrorKind::UniqueViolation
			| BackendErrorKind::NotFound
			| BackendErrorKind::Other => Self::Unexpected { message: e.message },
		}
	}
}

/// Configuration and validation failures raised by the engine.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Backend endpoint URL cannot be parsed.
	#[error("Backend endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Backend endpoint uses plain HTTP on a non-loopback host.
	#[error("Backend endpoint `{url}` must use https.")]
	InsecureEndpoint {
		/// Offending URL.
		url: String,
	},
	/// A required configuration value is missing or still a placeholder.
	#[error("Configuration value `{name}` is missing or a placeholder.")]
	MissingValue {
		/// Name of the missing value.
		name: &'static str,
	},
	/// Engine configuration document could not be parsed.
	#[error("Engine configuration is invalid at `{path}`.")]
	Parse {
		/// Path to the offending field.
		path: String,
		/// Structured parsing failure.
		#[source]
		source: serde_json::Error,
	},
	/// Session builder validation failed.
	#[error("Unable to build session.")]
	SessionBuild(#[from] crate::auth::SessionBuilderError),
	/// Identifier validation failed.
	#[error("Identifier is invalid.")]
	Identifier(#[from] crate::auth::IdentifierError),
	/// Authorize URL construction was requested without a redirect target.
	#[error("Authorize request is missing a redirect URI.")]
	MissingRedirect,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// A backend call did not complete within its time budget.
	#[error("{operation} timed out.")]
	NetworkTimeout {
		/// Operation label.
		operation: &'static str,
		/// Budget that elapsed, when the engine imposed it.
		after: Option<StdDuration>,
	},
	/// Backend returned a server-side failure.
	#[error("{operation} failed on the backend: {message}.")]
	Backend {
		/// Operation label.
		operation: &'static str,
		/// Backend-supplied message.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying client reported a network failure.
	#[error("Network error occurred while calling the backend.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the backend.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
