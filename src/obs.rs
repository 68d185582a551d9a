//! Observability helpers shared by every engine flow.
//!
//! # Feature Flags
//!
//! - Spans named `session_continuity.flow` carry the `flow` and `stage` fields and are always
//!   emitted through `tracing`.
//! - Enable `metrics` to increment the `session_continuity_flow_total` counter for every
//!   attempt/success/failure, labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Engine flows observed by spans and counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Single-flight session refresh.
	Refresh,
	/// Vault-backed restore, with or without a biometric prompt.
	SilentRestore,
	/// OAuth redirect resolution.
	OAuthCallback,
	/// Profile creation and group join.
	ProfileJoin,
	/// Cold-start routing.
	Boot,
	/// Password sign-in or registration.
	PasswordSignIn,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Refresh => "refresh",
			FlowKind::SilentRestore => "silent_restore",
			FlowKind::OAuthCallback => "oauth_callback",
			FlowKind::ProfileJoin => "profile_join",
			FlowKind::Boot => "boot",
			FlowKind::PasswordSignIn => "password_sign_in",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}

	/// Maps a flow result onto [`FlowOutcome::Success`] or [`FlowOutcome::Failure`].
	pub fn of<T, E>(result: &std::result::Result<T, E>) -> Self {
		if result.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure }
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
