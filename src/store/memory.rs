//! Thread-safe in-memory store for tests, demos, and platforms without persistent storage.

// self
use crate::{
	_prelude::*,
	store::{KeyValueStore, SecureStore, StoreError, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<String, String>>>;

/// In-process key-value store that can stand in for both ordinary and secure storage.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
	map: StoreMap,
	failing: Arc<RwLock<HashSet<String>>>,
}
impl MemoryStore {
	/// Returns `true` when `key` currently holds a value.
	pub fn contains(&self, key: &str) -> bool {
		self.map.read().contains_key(key)
	}

	/// Number of stored keys.
	pub fn len(&self) -> usize {
		self.map.read().len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.map.read().is_empty()
	}

	/// Makes every operation on `key` fail with a backend error until [`MemoryStore::heal`].
	pub fn fail_key(&self, key: impl Into<String>) {
		self.failing.write().insert(key.into());
	}

	/// Clears all injected failures.
	pub fn heal(&self) {
		self.failing.write().clear();
	}

	fn check(&self, key: &str) -> Result<(), StoreError> {
		if self.failing.read().contains(key) {
			Err(StoreError::Backend { message: format!("Injected failure for `{key}`") })
		} else {
			Ok(())
		}
	}
}
impl KeyValueStore for MemoryStore {
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
		Box::pin(async move {
			self.check(key)?;

			Ok(self.map.read().get(key).cloned())
		})
	}

	fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.check(key)?;
			self.map.write().insert(key.to_owned(), value);

			Ok(())
		})
	}

	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.check(key)?;
			self.map.write().remove(key);

			Ok(())
		})
	}
}
impl SecureStore for MemoryStore {}
