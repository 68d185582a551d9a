//! Validated location and API key of the identity backend.

// std
use std::{env, net::IpAddr};
// self
use crate::{_prelude::*, auth::TokenSecret, error::ConfigError};

const PLACEHOLDER_HOST: &str = "placeholder.supabase.co";
const PLACEHOLDER_KEY: &str = "placeholder-key";

/// Base URL plus public API key used by every backend request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendEndpoint {
	base_url: Url,
	api_key: TokenSecret,
}
impl BackendEndpoint {
	/// Environment variable holding the backend base URL.
	pub const URL_ENV: &'static str = "IDENTITY_BACKEND_URL";
	/// Environment variable holding the backend API key.
	pub const API_KEY_ENV: &'static str = "IDENTITY_BACKEND_API_KEY";

	/// Validates and wraps the provided URL and key.
	///
	/// Plain `http` is only accepted for loopback hosts; placeholder values are rejected.
	pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, ConfigError> {
		let base_url = base_url.trim();

		if base_url.is_empty() {
			return Err(ConfigError::MissingValue { name: Self::URL_ENV });
		}

		let mut url =
			Url::parse(base_url).map_err(|source| ConfigError::InvalidEndpoint { source })?;

		if url.host_str() == Some(PLACEHOLDER_HOST) {
			return Err(ConfigError::MissingValue { name: Self::URL_ENV });
		}

		validate_scheme(&url)?;

		let api_key = TokenSecret::new(api_key);

		if api_key.is_blank() || api_key.expose() == PLACEHOLDER_KEY {
			return Err(ConfigError::MissingValue { name: Self::API_KEY_ENV });
		}
		if !url.path().ends_with('/') {
			let path = format!("{}/", url.path());

			url.set_path(&path);
		}

		Ok(Self { base_url: url, api_key })
	}

	/// Reads [`Self::URL_ENV`] and [`Self::API_KEY_ENV`] from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		let url = env::var(Self::URL_ENV)
			.map_err(|_| ConfigError::MissingValue { name: Self::URL_ENV })?;
		let key = env::var(Self::API_KEY_ENV)
			.map_err(|_| ConfigError::MissingValue { name: Self::API_KEY_ENV })?;

		Self::new(&url, key)
	}

	/// Normalized base URL (always ends with `/`).
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Public API key sent with every request.
	pub fn api_key(&self) -> &TokenSecret {
		&self.api_key
	}

	/// Resolves a relative path such as `auth/v1/token` against the base URL.
	pub fn join(&self, path: &str) -> Result<Url, ConfigError> {
		self.base_url
			.join(path.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidEndpoint { source })
	}
}

fn validate_scheme(url: &Url) -> Result<(), ConfigError> {
	match url.scheme() {
		"https" => Ok(()),
		"http" if is_loopback(url) => Ok(()),
		_ => Err(ConfigError::InsecureEndpoint { url: url.to_string() }),
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host_str() {
		Some("localhost") => true,
		Some(host) => host
			.trim_start_matches('[')
			.trim_end_matches(']')
			.parse::<IpAddr>()
			.is_ok_and(|ip| ip.is_loopback()),
		None => false,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn https_endpoints_are_normalized() {
		let endpoint = BackendEndpoint::new("https://abc.example.co/base", "anon")
			.expect("Https endpoint should validate.");

		assert_eq!(endpoint.base_url().as_str(), "https://abc.example.co/base/");
		assert_eq!(
			endpoint.join("/auth/v1/token").expect("Join should succeed.").as_str(),
			"https://abc.example.co/base/auth/v1/token"
		);
	}

	#[test]
	fn plain_http_is_limited_to_loopback() {
		BackendEndpoint::new("http://127.0.0.1:54321", "anon")
			.expect("Loopback http should be accepted.");
		BackendEndpoint::new("http://localhost:54321", "anon")
			.expect("Localhost http should be accepted.");

		let err = BackendEndpoint::new("http://abc.example.co", "anon")
			.expect_err("Remote http must be rejected.");

		assert!(matches!(err, ConfigError::InsecureEndpoint { .. }));
	}

	#[test]
	fn placeholders_are_rejected() {
		let err = BackendEndpoint::new("https://placeholder.supabase.co", "anon")
			.expect_err("Placeholder URL must be rejected.");

		assert!(matches!(err, ConfigError::MissingValue { name: BackendEndpoint::URL_ENV }));

		let err = BackendEndpoint::new("https://abc.example.co", "placeholder-key")
			.expect_err("Placeholder key must be rejected.");

		assert!(matches!(err, ConfigError::MissingValue { name: BackendEndpoint::API_KEY_ENV }));

		let err = BackendEndpoint::new("  ", "anon").expect_err("Empty URL must be rejected.");

		assert!(matches!(err, ConfigError::MissingValue { .. }));
	}
}
