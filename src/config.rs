//! Timing and policy knobs for every engine component.
//!
//! Each policy has production defaults via [`Default`], `with_*` overrides, and serde support
//! with durations expressed in milliseconds so configs can ship as JSON next to the app.

// self
use crate::{_prelude::*, error::ConfigError};

/// Top-level engine configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	/// Session validity tracker.
	pub validity: ValidityPolicy,
	/// Refresh coordinator retries.
	pub refresh: RefreshPolicy,
	/// OAuth callback resolver budgets.
	pub oauth: OAuthPolicy,
	/// Profile/group-join guard.
	pub guard: GuardPolicy,
	/// Cold-start bookkeeping.
	pub lifecycle: LifecyclePolicy,
}
impl EngineConfig {
	/// Parses a JSON document, reporting the path of the first invalid field.
	pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
		let mut deserializer = serde_json::Deserializer::from_slice(bytes);

		serde_path_to_error::deserialize(&mut deserializer).map_err(|e| ConfigError::Parse {
			path: e.path().to_string(),
			source: e.into_inner(),
		})
	}

	/// Replaces the validity policy.
	pub fn with_validity(mut self, validity: ValidityPolicy) -> Self {
		self.validity = validity;

		self
	}

	/// Replaces the refresh policy.
	pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
		self.refresh = refresh;

		self
	}

	/// Replaces the OAuth policy.
	pub fn with_oauth(mut self, oauth: OAuthPolicy) -> Self {
		self.oauth = oauth;

		self
	}

	/// Replaces the guard policy.
	pub fn with_guard(mut self, guard: GuardPolicy) -> Self {
		self.guard = guard;

		self
	}

	/// Replaces the lifecycle policy.
	pub fn with_lifecycle(mut self, lifecycle: LifecyclePolicy) -> Self {
		self.lifecycle = lifecycle;

		self
	}
}

/// Controls when a cached session is considered expiring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidityPolicy {
	/// A confirmed rotation younger than this skips the validity read entirely.
	#[serde(with = "millis")]
	pub rotation_grace: StdDuration,
	/// Sessions with less remaining lifetime than this are treated as expiring.
	#[serde(with = "millis")]
	pub expiry_margin: StdDuration,
	/// Bound on the persisted-session read for regular callers.
	#[serde(with = "millis")]
	pub session_read_timeout: StdDuration,
	/// Bound on the persisted-session read for latency-sensitive callers.
	#[serde(with = "millis")]
	pub urgent_read_timeout: StdDuration,
}
impl ValidityPolicy {
	/// Overrides the rotation grace window.
	pub fn with_rotation_grace(mut self, grace: StdDuration) -> Self {
		self.rotation_grace = grace;

		self
	}

	/// Overrides the expiry margin.
	pub fn with_expiry_margin(mut self, margin: StdDuration) -> Self {
		self.expiry_margin = margin;

		self
	}

	/// Overrides the regular read timeout.
	pub fn with_session_read_timeout(mut self, timeout: StdDuration) -> Self {
		self.session_read_timeout = timeout;

		self
	}
}
impl Default for ValidityPolicy {
	fn default() -> Self {
		Self {
			rotation_grace: StdDuration::from_secs(5 * 60),
			expiry_margin: StdDuration::from_secs(300),
			session_read_timeout: StdDuration::from_secs(15),
			urgent_read_timeout: StdDuration::from_secs(5),
		}
	}
}

/// Retry and timeout schedule for network refreshes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
	/// Total network attempts per flight.
	pub max_attempts: u32,
	/// Timeout of the first attempt.
	#[serde(with = "millis")]
	pub base_timeout: StdDuration,
	/// Added to the timeout for every following attempt.
	#[serde(with = "millis")]
	pub timeout_step: StdDuration,
	/// Backoff after the first failed attempt; doubles afterwards.
	#[serde(with = "millis")]
	pub base_backoff: StdDuration,
}
impl RefreshPolicy {
	/// Overrides the attempt count.
	pub fn with_max_attempts(mut self, attempts: u32) -> Self {
		self.max_attempts = attempts.max(1);

		self
	}

	/// Overrides the timeout schedule.
	pub fn with_timeouts(mut self, base: StdDuration, step: StdDuration) -> Self {
		self.base_timeout = base;
		self.timeout_step = step;

		self
	}

	/// Overrides the base backoff.
	pub fn with_base_backoff(mut self, backoff: StdDuration) -> Self {
		self.base_backoff = backoff;

		self
	}

	/// Timeout for the zero-based `attempt`.
	pub fn attempt_timeout(&self, attempt: u32) -> StdDuration {
		self.base_timeout.saturating_add(self.timeout_step.saturating_mul(attempt))
	}

	/// Delay after the zero-based failed `attempt`.
	pub fn backoff(&self, attempt: u32) -> StdDuration {
		self.base_backoff.saturating_mul(2_u32.saturating_pow(attempt))
	}
}
impl Default for RefreshPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_timeout: StdDuration::from_secs(15),
			timeout_step: StdDuration::from_secs(5),
			base_backoff: StdDuration::from_secs(1),
		}
	}
}

/// Budgets for a single OAuth login attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthPolicy {
	/// Absolute deadline measured from [`crate::oauth::OAuthResolver::begin`].
	#[serde(with = "millis")]
	pub attempt_deadline: StdDuration,
	/// Interval between session reads.
	#[serde(with = "millis")]
	pub poll_interval: StdDuration,
	/// Number of session reads before giving up.
	pub poll_attempts: u32,
	/// How long a losing strategy may keep running in the background.
	#[serde(with = "millis")]
	pub loser_grace: StdDuration,
}
impl OAuthPolicy {
	/// Overrides the absolute attempt deadline.
	pub fn with_attempt_deadline(mut self, deadline: StdDuration) -> Self {
		self.attempt_deadline = deadline;

		self
	}

	/// Overrides the poll schedule.
	pub fn with_polling(mut self, interval: StdDuration, attempts: u32) -> Self {
		self.poll_interval = interval;
		self.poll_attempts = attempts.max(1);

		self
	}

	/// Total confirmation budget (`poll_interval * poll_attempts`).
	pub fn poll_budget(&self) -> StdDuration {
		self.poll_interval.saturating_mul(self.poll_attempts)
	}
}
impl Default for OAuthPolicy {
	fn default() -> Self {
		Self {
			attempt_deadline: StdDuration::from_secs(60),
			poll_interval: StdDuration::from_millis(500),
			poll_attempts: 20,
			loser_grace: StdDuration::from_secs(5),
		}
	}
}

/// Duplicate-call handling of the profile/group-join guard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardPolicy {
	/// How often a duplicate caller checks whether the original call finished.
	#[serde(with = "millis")]
	pub duplicate_poll: StdDuration,
	/// Upper bound a duplicate caller waits before re-reading backend state.
	#[serde(with = "millis")]
	pub duplicate_wait: StdDuration,
	/// Re-read the membership row after a unique violation before reporting success.
	pub verify_duplicate_membership: bool,
}
impl GuardPolicy {
	/// Overrides the duplicate wait schedule.
	pub fn with_duplicate_wait(mut self, poll: StdDuration, wait: StdDuration) -> Self {
		self.duplicate_poll = poll;
		self.duplicate_wait = wait;

		self
	}

	/// Toggles the confirming re-read after a unique violation.
	pub fn with_verify_duplicate_membership(mut self, verify: bool) -> Self {
		self.verify_duplicate_membership = verify;

		self
	}
}
impl Default for GuardPolicy {
	fn default() -> Self {
		Self {
			duplicate_poll: StdDuration::from_millis(100),
			duplicate_wait: StdDuration::from_secs(3),
			verify_duplicate_membership: true,
		}
	}
}

/// Cold-start detection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecyclePolicy {
	/// Closing the app for longer than this makes the next launch a cold start.
	#[serde(with = "millis")]
	pub cold_start_threshold: StdDuration,
}
impl Default for LifecyclePolicy {
	fn default() -> Self {
		Self { cold_start_threshold: StdDuration::from_secs(5 * 60) }
	}
}

mod millis {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &StdDuration, serializer: S) -> std::result::Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<StdDuration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(StdDuration::from_millis)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn refresh_schedule_matches_defaults() {
		let policy = RefreshPolicy::default();

		assert_eq!(policy.attempt_timeout(0), StdDuration::from_secs(15));
		assert_eq!(policy.attempt_timeout(2), StdDuration::from_secs(25));
		assert_eq!(policy.backoff(0), StdDuration::from_secs(1));
		assert_eq!(policy.backoff(1), StdDuration::from_secs(2));
		assert_eq!(policy.backoff(2), StdDuration::from_secs(4));
	}

	#[test]
	fn oauth_poll_budget_is_ten_seconds() {
		assert_eq!(OAuthPolicy::default().poll_budget(), StdDuration::from_secs(10));
	}

	#[test]
	fn partial_json_keeps_defaults() {
		let config = EngineConfig::from_json_slice(br#"{ "refresh": { "max_attempts": 5 } }"#)
			.expect("Partial config should parse.");

		assert_eq!(config.refresh.max_attempts, 5);
		assert_eq!(config.refresh.base_timeout, StdDuration::from_secs(15));
		assert_eq!(config.oauth, OAuthPolicy::default());
	}

	#[test]
	fn invalid_fields_report_their_path() {
		let err = EngineConfig::from_json_slice(br#"{ "oauth": { "poll_interval": "fast" } }"#)
			.expect_err("String durations must be rejected.");

		match err {
			ConfigError::Parse { path, .. } => assert_eq!(path, "oauth.poll_interval"),
			other => panic!("Unexpected error: {other:?}"),
		}
	}

	#[test]
	fn durations_serialize_as_millis() {
		let json = serde_json::to_value(GuardPolicy::default()).expect("Policy should serialize.");

		assert_eq!(json["duplicate_poll"], 100);
		assert_eq!(json["verify_duplicate_membership"], true);
	}
}
