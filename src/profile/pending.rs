//! Group invitation remembered across sign-in until the membership is confirmed.

// self
use crate::{_prelude::*, auth::GroupId, store::KeyValueStore};

/// Ordinary-store key holding the pending group id.
pub const PENDING_GROUP_KEY: &str = "pending_group_join";

/// Pending group-join marker kept in an ordinary store.
#[derive(Clone)]
pub struct PendingJoinMarker {
	store: Arc<dyn KeyValueStore>,
}
impl PendingJoinMarker {
	/// Creates a marker over `store`.
	pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
		Self { store }
	}

	/// Remembers an invitation opened before the user signed in.
	pub async fn record(&self, group: &GroupId) -> Result<()> {
		self.store.set(PENDING_GROUP_KEY, group.to_string()).await?;

		tracing::debug!(%group, "Pending group join recorded.");

		Ok(())
	}

	/// Pending group, if any. Unreadable or malformed values read as absent.
	pub async fn peek(&self) -> Option<GroupId> {
		let raw = match self.store.get(PENDING_GROUP_KEY).await {
			Ok(raw) => raw?,
			Err(e) => {
				tracing::warn!(error = %e, "Pending group join could not be read.");

				return None;
			},
		};

		GroupId::new(raw.trim()).ok()
	}

	/// Removes the marker when it still points at `group`.
	pub async fn consume(&self, group: &GroupId) {
		if self.peek().await.as_ref() == Some(group) {
			self.clear().await;
		}
	}

	/// Removes the marker unconditionally.
	pub async fn clear(&self) {
		if let Err(e) = self.store.remove(PENDING_GROUP_KEY).await {
			tracing::warn!(error = %e, "Pending group join could not be cleared.");
		}
	}
}
impl Debug for PendingJoinMarker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PendingJoinMarker").finish_non_exhaustive()
	}
}
