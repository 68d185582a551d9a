//! Parsing and classification of OAuth redirect URLs.

// crates.io
use url::form_urlencoded;
// self
use crate::{_prelude::*, auth::TokenSecret};

const MISCONFIGURATION_CODES: &[&str] = &[
	"server_error",
	"invalid_request",
	"invalid_client",
	"unauthorized_client",
	"unsupported_response_type",
	"invalid_scope",
];

/// What an OAuth redirect carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackPayload {
	/// The provider reported an error.
	Error {
		/// OAuth error code.
		code: String,
		/// Provider-supplied description.
		description: Option<String>,
	},
	/// Implicit-flow tokens.
	Tokens {
		/// Access credential.
		access_token: TokenSecret,
		/// Refresh credential.
		refresh_token: TokenSecret,
		/// Expiry reported alongside the tokens.
		expires_at: Option<OffsetDateTime>,
		/// Returned state, when present.
		state: Option<String>,
	},
	/// Authorization code for a PKCE exchange.
	Code {
		/// Authorization code.
		code: String,
		/// Returned state, when present.
		state: Option<String>,
	},
}
impl CallbackPayload {
	/// Returned `state` parameter, if any.
	pub fn state(&self) -> Option<&str> {
		match self {
			CallbackPayload::Tokens { state, .. } | CallbackPayload::Code { state, .. } =>
				state.as_deref(),
			CallbackPayload::Error { .. } => None,
		}
	}
}

/// Quick check for deep links that look like OAuth redirects.
pub fn is_oauth_callback(url: &str) -> bool {
	url.contains("access_token=") || url.contains("?code=") || url.contains("&code=") || url.contains("error=")
}

/// Parses a redirect URL, reading both query and fragment (fragment wins on conflicts).
///
/// The `error` parameter is inspected before anything else, so a failed redirect never has its
/// tokens extracted.
pub fn parse_callback(raw: &str) -> Result<CallbackPayload> {
	let url = Url::parse(raw.trim())
		.map_err(|e| Error::InvalidCallback { reason: format!("Unparseable URL: {e}") })?;
	let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();

	if let Some(fragment) = url.fragment() {
		params.extend(form_urlencoded::parse(fragment.as_bytes()).into_owned());
	}

	let mut take = |key: &str| params.remove(key).filter(|value| !value.trim().is_empty());

	if let Some(code) = take("error") {
		return Ok(CallbackPayload::Error { code, description: take("error_description") });
	}

	let state = take("state");

	if let Some(access_token) = take("access_token") {
		let refresh_token = take("refresh_token").ok_or_else(|| Error::InvalidCallback {
			reason: "Callback carries an access token without a refresh token".into(),
		})?;
		let expires_at = match (take("expires_at"), take("expires_in")) {
			(Some(at), _) => at
				.parse::<i64>()
				.ok()
				.and_then(|at| OffsetDateTime::from_unix_timestamp(at).ok()),
			(None, Some(seconds)) => seconds
				.parse::<i64>()
				.ok()
				.and_then(|seconds| {
					OffsetDateTime::now_utc().checked_add(Duration::seconds(seconds))
				}),
			(None, None) => None,
		};

		return Ok(CallbackPayload::Tokens {
			access_token: TokenSecret::new(access_token),
			refresh_token: TokenSecret::new(refresh_token),
			expires_at,
			state,
		});
	}
	if let Some(code) = take("code") {
		return Ok(CallbackPayload::Code { code, state });
	}

	Err(Error::InvalidCallback { reason: "URL is not an OAuth callback".into() })
}

/// Maps a provider error code onto the engine taxonomy.
pub fn classify_error(code: String, description: Option<String>) -> Error {
	if code == "access_denied" {
		Error::AccessDenied { description }
	} else if MISCONFIGURATION_CODES.contains(&code.as_str()) {
		let description = description.unwrap_or_else(|| code.clone());

		Error::ServerMisconfiguration { code, description }
	} else {
		Error::OAuth { code, description }
	}
}
