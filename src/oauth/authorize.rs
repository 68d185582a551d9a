//! Authorize URL construction with PKCE and state for browser-based sign-in.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, backend::BackendEndpoint, error::ConfigError};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Parameters of a browser sign-in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizeRequest {
	/// Identity backend authorize endpoint.
	pub authorize_endpoint: Url,
	/// External provider name (for example `google` or `apple`).
	pub provider: String,
	/// Deep link the browser returns to.
	pub redirect_to: Url,
	/// Extra provider scopes, space-delimited when sent.
	pub scopes: Vec<String>,
}
impl AuthorizeRequest {
	/// Creates a request against an explicit authorize endpoint.
	pub fn new(authorize_endpoint: Url, provider: impl Into<String>, redirect_to: Url) -> Self {
		Self { authorize_endpoint, provider: provider.into(), redirect_to, scopes: Vec::new() }
	}

	/// Creates a request against the backend's `auth/v1/authorize` endpoint.
	pub fn for_backend(
		endpoint: &BackendEndpoint,
		provider: impl Into<String>,
		redirect_to: Url,
	) -> Result<Self, ConfigError> {
		Ok(Self::new(endpoint.join("auth/v1/authorize")?, provider, redirect_to))
	}

	/// Adds provider scopes.
	pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scopes.extend(scopes.into_iter().map(Into::into));

		self
	}
}

/// Pending browser sign-in returned by [`crate::oauth::OAuthResolver::begin`].
#[derive(Clone)]
pub struct AuthorizationAttempt {
	/// URL to open in the external browser.
	pub authorize_url: Url,
	/// Opaque state that must round-trip through the redirect.
	pub state: String,
	/// Deep link the browser returns to.
	pub redirect_to: Url,
	/// Absolute deadline of the attempt.
	pub deadline: Instant,
	pkce: PkcePair,
}
impl AuthorizationAttempt {
	pub(crate) fn build(request: &AuthorizeRequest, deadline: Instant) -> Self {
		let state = random_string(STATE_LEN);
		let pkce = PkcePair::generate();
		let authorize_url = build_authorize_url(request, &state, &pkce);

		Self { authorize_url, state, redirect_to: request.redirect_to.clone(), deadline, pkce }
	}

	/// PKCE code challenge derived from the secret verifier.
	pub fn code_challenge(&self) -> &str {
		&self.pkce.challenge
	}

	/// Returns `true` when the redirect's state matches; absent state is accepted.
	pub fn accepts_state(&self, returned: Option<&str>) -> bool {
		returned.is_none_or(|returned| returned == self.state)
	}

	pub(crate) fn verifier(&self) -> &str {
		&self.pkce.verifier
	}
}
impl Debug for AuthorizationAttempt {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationAttempt")
			.field("authorize_url", &self.authorize_url)
			.field("state", &self.state)
			.field("redirect_to", &self.redirect_to)
			.field("deadline", &self.deadline)
			.field("code_challenge", &self.pkce.challenge)
			.finish()
	}
}

#[derive(Clone)]
struct PkcePair {
	verifier: String,
	challenge: String,
}
impl PkcePair {
	fn generate() -> Self {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		Self { verifier, challenge }
	}
}

fn build_authorize_url(request: &AuthorizeRequest, state: &str, pkce: &PkcePair) -> Url {
	let mut url = request.authorize_endpoint.clone();
	let mut pairs = url.query_pairs_mut();

	pairs.append_pair("provider", &request.provider);
	pairs.append_pair("redirect_to", request.redirect_to.as_str());

	if !request.scopes.is_empty() {
		pairs.append_pair("scopes", &request.scopes.join(" "));
	}

	pairs.append_pair("state", state);
	pairs.append_pair("code_challenge", &pkce.challenge);
	pairs.append_pair("code_challenge_method", "s256");

	drop(pairs);

	url
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}
