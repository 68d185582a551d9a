//! Session and identity continuity engine. Keeps a device authenticated across cold starts, token
//! expiry, OAuth browser round-trips, and biometric re-authentication while guaranteeing that the
//! profile and group-join side effects of a sign-in run at most once.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod backend;
pub mod boot;
pub mod config;
pub mod error;
pub mod oauth;
pub mod obs;
pub mod profile;
pub mod session;
pub mod store;
pub mod vault;

#[cfg(any(test, feature = "test"))]
#[doc(hidden)]
pub mod testkit;

#[cfg(any(test, feature = "test"))]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and fakes for unit and integration tests; enabled via `cfg(test)` or
	//! the `test` feature.

	pub use crate::{_prelude::*, testkit::*};

	// self
	use crate::{
		config::EngineConfig,
		session::SessionManager,
		store::{KeyValueStore, MemoryStore, SecureStore},
		vault::{BiometricPrompt, CredentialVault},
	};

	/// Everything a test needs to drive a [`SessionManager`] against in-memory collaborators.
	pub struct TestHarness {
		/// Manager under test.
		pub manager: SessionManager,
		/// Scripted identity backend.
		pub identity: Arc<FakeIdentity>,
		/// Store backing both the secure vault and ordinary preferences.
		pub store: Arc<MemoryStore>,
		/// Vault wired into the manager.
		pub vault: CredentialVault,
		/// Scripted biometric prompt.
		pub prompt: Arc<FakePrompt>,
	}

	/// Builds a [`TestHarness`] with the provided configuration.
	pub fn build_test_harness(config: EngineConfig) -> TestHarness {
		let identity = Arc::new(FakeIdentity::default());
		let store = Arc::new(MemoryStore::default());
		let prompt = Arc::new(FakePrompt::default());
		let secure: Arc<dyn SecureStore> = store.clone();
		let preferences: Arc<dyn KeyValueStore> = store.clone();
		let biometric: Arc<dyn BiometricPrompt> = prompt.clone();
		let vault = CredentialVault::new(secure, preferences, biometric, identity.clone());
		let manager = SessionManager::new(identity.clone(), config).with_vault(vault.clone());

		TestHarness { manager, identity, store, vault, prompt }
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, HashSet},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use tokio::time::Instant;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
