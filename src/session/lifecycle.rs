//! App open/close bookkeeping used to tell cold starts from quick resumes.

// self
use crate::{_prelude::*, config::LifecyclePolicy, store::KeyValueStore};

/// Ordinary-store key holding the last app close instant.
pub const LAST_APP_CLOSE_KEY: &str = "last_app_close_time";
/// Ordinary-store key holding the current session start instant.
pub const SESSION_START_KEY: &str = "current_session_start_time";
/// Ordinary-store key holding the last route reached successfully.
pub const LAST_NAVIGATION_KEY: &str = "last_successful_navigation";

/// Records app lifecycle instants as unix-millisecond strings in an ordinary store.
///
/// Every operation is best-effort: storage failures are logged and reads fall back to "unknown".
#[derive(Clone)]
pub struct SessionLifecycle {
	store: Arc<dyn KeyValueStore>,
	policy: LifecyclePolicy,
}
impl SessionLifecycle {
	/// Creates a tracker over `store`.
	pub fn new(store: Arc<dyn KeyValueStore>, policy: LifecyclePolicy) -> Self {
		Self { store, policy }
	}

	/// Records that the app went to the background or closed; ends the current session.
	pub async fn record_app_close(&self) {
		self.record_app_close_at(OffsetDateTime::now_utc()).await;
	}

	/// [`SessionLifecycle::record_app_close`] with an explicit instant.
	pub async fn record_app_close_at(&self, at: OffsetDateTime) {
		self.write(LAST_APP_CLOSE_KEY, encode(at)).await;

		if let Err(e) = self.store.remove(SESSION_START_KEY).await {
			tracing::warn!(error = %e, "Failed to clear session start time.");
		}
	}

	/// Records that a new app session started.
	pub async fn record_session_start(&self) {
		self.write(SESSION_START_KEY, encode(OffsetDateTime::now_utc())).await;
	}

	/// Instant the app was last closed.
	pub async fn last_app_close(&self) -> Option<OffsetDateTime> {
		self.read(LAST_APP_CLOSE_KEY).await.and_then(|raw| decode(&raw))
	}

	/// Instant the current app session started.
	pub async fn current_session_start(&self) -> Option<OffsetDateTime> {
		self.read(SESSION_START_KEY).await.and_then(|raw| decode(&raw))
	}

	/// Returns `true` when the app was closed longer than the threshold ago, or never recorded.
	pub async fn is_cold_start(&self) -> bool {
		self.is_cold_start_at(OffsetDateTime::now_utc()).await
	}

	/// [`SessionLifecycle::is_cold_start`] evaluated at `now`.
	pub async fn is_cold_start_at(&self, now: OffsetDateTime) -> bool {
		let Some(closed_at) = self.last_app_close().await else {
			return true;
		};
		let threshold = Duration::try_from(self.policy.cold_start_threshold).unwrap_or(Duration::MAX);

		now - closed_at > threshold
	}

	/// Records the last route reached successfully.
	pub async fn record_navigation(&self, route: &str) {
		self.write(LAST_NAVIGATION_KEY, route.to_owned()).await;
	}

	/// Last route reached successfully.
	pub async fn last_navigation(&self) -> Option<String> {
		self.read(LAST_NAVIGATION_KEY).await
	}

	/// Removes every lifecycle key.
	pub async fn clear(&self) {
		for key in [LAST_APP_CLOSE_KEY, SESSION_START_KEY, LAST_NAVIGATION_KEY] {
			if let Err(e) = self.store.remove(key).await {
				tracing::warn!(key, error = %e, "Failed to clear lifecycle key.");
			}
		}
	}

	async fn write(&self, key: &'static str, value: String) {
		if let Err(e) = self.store.set(key, value).await {
			tracing::warn!(key, error = %e, "Failed to record lifecycle value.");
		}
	}

	async fn read(&self, key: &'static str) -> Option<String> {
		match self.store.get(key).await {
			Ok(value) => value,
			Err(e) => {
				tracing::warn!(key, error = %e, "Failed to read lifecycle value.");

				None
			},
		}
	}
}
impl Debug for SessionLifecycle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionLifecycle").field("policy", &self.policy).finish_non_exhaustive()
	}
}

fn encode(at: OffsetDateTime) -> String {
	(at.unix_timestamp_nanos() / 1_000_000).to_string()
}

fn decode(raw: &str) -> Option<OffsetDateTime> {
	let millis = raw.trim().parse::<i128>().ok()?;

	OffsetDateTime::from_unix_timestamp_nanos(millis * 1_000_000).ok()
}
