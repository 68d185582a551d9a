//! HTTP implementation of [`IdentityClient`] and [`ProfileDirectory`] over reqwest.
//!
//! Authentication calls target a GoTrue-style API under `auth/v1/`; profile and membership rows
//! live behind a PostgREST-style API under `rest/v1/`. The backend keeps its own persisted
//! session in a [`KeyValueStore`], which is what [`IdentityClient::current_session`] reads.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use reqwest::{RequestBuilder, redirect::Policy};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{GroupId, IdentityId, Session, TokenSecret},
	backend::{
		BackendEndpoint, BackendError, BackendErrorKind, BackendFuture, IdentityClient,
		IdentityUser, NewMembership, NewProfile, Profile, ProfileDirectory, ProfilePatch,
		SignUpOutcome,
	},
	error::ConfigError,
	store::KeyValueStore,
};

/// Store key under which the backend persists its session.
pub const SESSION_STORAGE_KEY: &str = "identity.session";

const UNIQUE_VIOLATION_CODE: &str = "23505";

/// reqwest-backed identity backend plus profile directory.
#[derive(Clone)]
pub struct RestBackend {
	http: ReqwestClient,
	endpoint: BackendEndpoint,
	storage: Arc<dyn KeyValueStore>,
}
impl RestBackend {
	/// Builds a backend with a default reqwest client that never follows redirects.
	pub fn new(
		endpoint: BackendEndpoint,
		storage: Arc<dyn KeyValueStore>,
	) -> Result<Self, ConfigError> {
		let http = ReqwestClient::builder().redirect(Policy::none()).build()?;

		Ok(Self::with_client(http, endpoint, storage))
	}

	/// Wraps an existing reqwest client.
	pub fn with_client(
		http: ReqwestClient,
		endpoint: BackendEndpoint,
		storage: Arc<dyn KeyValueStore>,
	) -> Self {
		Self { http, endpoint, storage }
	}

	/// Endpoint the backend talks to.
	pub fn endpoint(&self) -> &BackendEndpoint {
		&self.endpoint
	}

	fn url(&self, operation: &'static str, path: &str) -> Result<Url, BackendError> {
		self.endpoint
			.join(path)
			.map_err(|e| BackendError::new(operation, BackendErrorKind::Other, e.to_string()))
	}

	fn authorized(&self, request: RequestBuilder, bearer: Option<&TokenSecret>) -> RequestBuilder {
		let api_key = self.endpoint.api_key().expose();
		let bearer = bearer.map(TokenSecret::expose).unwrap_or(api_key);

		request.header("apikey", api_key).bearer_auth(bearer)
	}

	async fn send<T>(&self, operation: &'static str, request: RequestBuilder) -> Result<T, BackendError>
	where
		T: DeserializeOwned,
	{
		let bytes = self.send_raw(operation, request).await?;

		decode(operation, &bytes)
	}

	async fn send_raw(
		&self,
		operation: &'static str,
		request: RequestBuilder,
	) -> Result<Vec<u8>, BackendError> {
		let response = request.send().await.map_err(|e| map_reqwest_error(operation, e))?;
		let status = response.status();
		let bytes = response.bytes().await.map_err(|e| map_reqwest_error(operation, e))?;

		if status.is_success() {
			return Ok(bytes.to_vec());
		}

		let body = serde_json::from_slice::<ErrorBody>(&bytes).unwrap_or_default();
		let kind = classify_failure(status.as_u16(), &body);

		tracing::debug!(operation, status = status.as_u16(), ?kind, "Backend call failed.");

		Err(BackendError::new(operation, kind, body.message(status.as_u16())))
	}

	async fn token_grant(
		&self,
		operation: &'static str,
		grant_type: &str,
		body: serde_json::Value,
	) -> Result<Session, BackendError> {
		let mut url = self.url(operation, "auth/v1/token")?;

		url.query_pairs_mut().append_pair("grant_type", grant_type);

		let request = self.authorized(self.http.post(url), None).json(&body);
		let response = self.send::<TokenResponse>(operation, request).await?;
		let session = response.into_session(operation)?;

		self.persist(operation, &session).await?;

		Ok(session)
	}

	async fn get_user(
		&self,
		operation: &'static str,
		access_token: &TokenSecret,
	) -> Result<UserResponse, BackendError> {
		let url = self.url(operation, "auth/v1/user")?;
		let request = self.authorized(self.http.get(url), Some(access_token));

		self.send(operation, request).await
	}

	async fn persist(&self, operation: &'static str, session: &Session) -> Result<(), BackendError> {
		let json = serde_json::to_string(session)
			.map_err(|e| BackendError::new(operation, BackendErrorKind::Other, e.to_string()))?;

		self.storage
			.set(SESSION_STORAGE_KEY, json)
			.await
			.map_err(|e| BackendError::new(operation, BackendErrorKind::Other, e.to_string()))
	}

	async fn forget(&self, operation: &'static str) -> Result<(), BackendError> {
		self.storage
			.remove(SESSION_STORAGE_KEY)
			.await
			.map_err(|e| BackendError::new(operation, BackendErrorKind::Other, e.to_string()))
	}

	fn rows_url(
		&self,
		operation: &'static str,
		table: &str,
		filters: &[(&str, String)],
		select: &str,
	) -> Result<Url, BackendError> {
		let mut url = self.url(operation, &format!("rest/v1/{table}"))?;

		{
			let mut pairs = url.query_pairs_mut();

			for (column, value) in filters {
				pairs.append_pair(column, &format!("eq.{value}"));
			}

			pairs.append_pair("select", select);
		}

		Ok(url)
	}
}
impl Debug for RestBackend {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RestBackend").field("endpoint", &self.endpoint.base_url()).finish()
	}
}
impl IdentityClient for RestBackend {
	fn current_session(&self) -> BackendFuture<'_, Option<Session>> {
		Box::pin(async move {
			const OP: &str = "current_session";

			let stored = self
				.storage
				.get(SESSION_STORAGE_KEY)
				.await
				.map_err(|e| BackendError::new(OP, BackendErrorKind::Other, e.to_string()))?;

			stored.map(|json| decode(OP, json.as_bytes())).transpose()
		})
	}

	fn refresh_session<'a>(
		&'a self,
		refresh_token: &'a TokenSecret,
	) -> BackendFuture<'a, Session> {
		Box::pin(async move {
			self.token_grant(
				"refresh_session",
				"refresh_token",
				serde_json::json!({ "refresh_token": refresh_token.expose() }),
			)
			.await
		})
	}

	fn set_session<'a>(
		&'a self,
		access_token: &'a TokenSecret,
		refresh_token: &'a TokenSecret,
	) -> BackendFuture<'a, Session> {
		Box::pin(async move {
			const OP: &str = "set_session";

			let claims = decode_claims(access_token.expose()).ok_or_else(|| {
				BackendError::new(OP, BackendErrorKind::InvalidGrant, "Access token is not a JWT.")
			})?;
			let expires_at = claims
				.exp
				.map(OffsetDateTime::from_unix_timestamp)
				.transpose()
				.map_err(|e| BackendError::new(OP, BackendErrorKind::InvalidGrant, e.to_string()))?;

			if expires_at.is_some_and(|at| at <= OffsetDateTime::now_utc()) {
				tracing::debug!("Installed access token already expired; refreshing instead.");

				return self.refresh_session(refresh_token).await;
			}

			let user = self.get_user(OP, access_token).await?;
			let mut builder = Session::builder(user.id)
				.access_token(access_token.expose())
				.refresh_token(refresh_token.expose());

			if let Some(at) = expires_at {
				builder = builder.expires_at(at);
			}
			if let Some(email) = user.email.or(claims.email) {
				builder = builder.email(email);
			}

			let session = builder
				.build()
				.map_err(|e| BackendError::new(OP, BackendErrorKind::InvalidGrant, e.to_string()))?;

			self.persist(OP, &session).await?;

			Ok(session)
		})
	}

	fn exchange_code<'a>(&'a self, code: &'a str, verifier: &'a str) -> BackendFuture<'a, Session> {
		Box::pin(async move {
			self.token_grant(
				"exchange_code",
				"pkce",
				serde_json::json!({ "auth_code": code, "code_verifier": verifier }),
			)
			.await
		})
	}

	fn sign_in_with_password<'a>(
		&'a self,
		email: &'a str,
		password: &'a str,
	) -> BackendFuture<'a, Session> {
		Box::pin(async move {
			self.token_grant(
				"sign_in_with_password",
				"password",
				serde_json::json!({ "email": email, "password": password }),
			)
			.await
		})
	}

	fn sign_up<'a>(&'a self, email: &'a str, password: &'a str) -> BackendFuture<'a, SignUpOutcome> {
		Box::pin(async move {
			const OP: &str = "sign_up";

			let url = self.url(OP, "auth/v1/signup")?;
			let request = self
				.authorized(self.http.post(url), None)
				.json(&serde_json::json!({ "email": email, "password": password }));

			match self.send::<SignUpResponse>(OP, request).await? {
				SignUpResponse::Session(response) => {
					let session = response.into_session(OP)?;

					self.persist(OP, &session).await?;

					Ok(SignUpOutcome::SignedIn(session))
				},
				SignUpResponse::User(user) =>
					Ok(SignUpOutcome::ConfirmationRequired { identity: user.id }),
			}
		})
	}

	fn fetch_user<'a>(&'a self, session: &'a Session) -> BackendFuture<'a, IdentityUser> {
		Box::pin(async move {
			let user = self.get_user("fetch_user", &session.access_token).await?;

			Ok(IdentityUser { id: user.id, email: user.email })
		})
	}

	fn sign_out<'a>(&'a self, session: &'a Session) -> BackendFuture<'a, ()> {
		Box::pin(async move {
			const OP: &str = "sign_out";

			// Local state goes first so a failed revoke never leaves a usable session behind.
			self.forget(OP).await?;

			let url = self.url(OP, "auth/v1/logout")?;
			let request = self.authorized(self.http.post(url), Some(&session.access_token));

			self.send_raw(OP, request).await.map(|_| ())
		})
	}
}
impl ProfileDirectory for RestBackend {
	fn fetch_profile<'a>(
		&'a self,
		session: &'a Session,
		id: &'a IdentityId,
	) -> BackendFuture<'a, Option<Profile>> {
		Box::pin(async move {
			const OP: &str = "fetch_profile";

			let url = self.rows_url(OP, "users", &[("id", id.to_string())], "*")?;
			let request = self.authorized(self.http.get(url), Some(&session.access_token));
			let rows = self.send::<Vec<Profile>>(OP, request).await?;

			Ok(rows.into_iter().next())
		})
	}

	fn insert_profile<'a>(
		&'a self,
		session: &'a Session,
		profile: NewProfile,
	) -> BackendFuture<'a, Profile> {
		Box::pin(async move {
			const OP: &str = "insert_profile";

			let url = self.url(OP, "rest/v1/users")?;
			let request = self
				.authorized(self.http.post(url), Some(&session.access_token))
				.header("Prefer", "return=representation")
				.json(&profile);

			single_row(OP, self.send::<Vec<Profile>>(OP, request).await?)
		})
	}

	fn update_profile<'a>(
		&'a self,
		session: &'a Session,
		id: &'a IdentityId,
		patch: ProfilePatch,
	) -> BackendFuture<'a, Profile> {
		Box::pin(async move {
			const OP: &str = "update_profile";

			let url = self.rows_url(OP, "users", &[("id", id.to_string())], "*")?;
			let request = self
				.authorized(self.http.patch(url), Some(&session.access_token))
				.header("Prefer", "return=representation")
				.json(&patch);

			single_row(OP, self.send::<Vec<Profile>>(OP, request).await?)
		})
	}

	fn membership_exists<'a>(
		&'a self,
		session: &'a Session,
		group: &'a GroupId,
		id: &'a IdentityId,
	) -> BackendFuture<'a, bool> {
		Box::pin(async move {
			const OP: &str = "membership_exists";

			let url = self.rows_url(
				OP,
				"group_members",
				&[("group_id", group.to_string()), ("user_id", id.to_string())],
				"group_id",
			)?;
			let request = self.authorized(self.http.get(url), Some(&session.access_token));
			let rows = self.send::<Vec<MembershipRow>>(OP, request).await?;

			Ok(!rows.is_empty())
		})
	}

	fn insert_membership<'a>(
		&'a self,
		session: &'a Session,
		membership: NewMembership,
	) -> BackendFuture<'a, ()> {
		Box::pin(async move {
			const OP: &str = "insert_membership";

			let url = self.url(OP, "rest/v1/group_members")?;
			let request = self
				.authorized(self.http.post(url), Some(&session.access_token))
				.header("Prefer", "return=minimal")
				.json(&membership);

			self.send_raw(OP, request).await.map(|_| ())
		})
	}

	fn first_membership<'a>(
		&'a self,
		session: &'a Session,
		id: &'a IdentityId,
	) -> BackendFuture<'a, Option<GroupId>> {
		Box::pin(async move {
			const OP: &str = "first_membership";

			let mut url =
				self.rows_url(OP, "group_members", &[("user_id", id.to_string())], "group_id")?;

			url.query_pairs_mut().append_pair("limit", "1");

			let request = self.authorized(self.http.get(url), Some(&session.access_token));
			let rows = self.send::<Vec<MembershipRow>>(OP, request).await?;

			Ok(rows.into_iter().next().map(|row| row.group_id))
		})
	}
}

#[derive(Deserialize)]
struct TokenResponse {
	access_token: String,
	refresh_token: String,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default)]
	expires_at: Option<i64>,
	user: UserResponse,
}
impl TokenResponse {
	fn into_session(self, operation: &'static str) -> Result<Session, BackendError> {
		let mut builder = Session::builder(self.user.id)
			.access_token(self.access_token)
			.refresh_token(self.refresh_token);

		if let Some(at) = self.expires_at {
			let at = OffsetDateTime::from_unix_timestamp(at)
				.map_err(|e| BackendError::new(operation, BackendErrorKind::Other, e.to_string()))?;

			builder = builder.expires_at(at);
		} else if let Some(seconds) = self.expires_in {
			builder = builder.expires_in(Duration::seconds(seconds));
		}
		if let Some(email) = self.user.email {
			builder = builder.email(email);
		}

		builder
			.build()
			.map_err(|e| BackendError::new(operation, BackendErrorKind::Other, e.to_string()))
	}
}

#[derive(Deserialize)]
struct UserResponse {
	id: IdentityId,
	#[serde(default)]
	email: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
	Session(TokenResponse),
	User(UserResponse),
}

#[derive(Deserialize)]
struct MembershipRow {
	group_id: GroupId,
}

#[derive(Deserialize)]
struct JwtClaims {
	#[serde(default)]
	exp: Option<i64>,
	#[serde(default)]
	email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	error_code: Option<String>,
	#[serde(default)]
	error_description: Option<String>,
	#[serde(default)]
	msg: Option<String>,
	#[serde(default)]
	message: Option<String>,
	// GoTrue sends a numeric status here; PostgREST sends the SQLSTATE string.
	#[serde(default)]
	code: Option<serde_json::Value>,
}
impl ErrorBody {
	fn sql_state(&self) -> Option<&str> {
		self.code.as_ref().and_then(serde_json::Value::as_str)
	}

	fn error_code(&self) -> Option<&str> {
		self.error_code.as_deref().or(self.error.as_deref())
	}

	fn message(&self, status: u16) -> String {
		self.error_description
			.as_deref()
			.or(self.msg.as_deref())
			.or(self.message.as_deref())
			.or(self.error.as_deref())
			.map(str::to_owned)
			.unwrap_or_else(|| format!("HTTP {status}"))
	}
}

fn classify_failure(status: u16, body: &ErrorBody) -> BackendErrorKind {
	if status >= 500 {
		return BackendErrorKind::Server { status };
	}
	if body.sql_state() == Some(UNIQUE_VIOLATION_CODE) {
		return BackendErrorKind::UniqueViolation;
	}

	match body.error_code() {
		Some(
			"invalid_grant"
			| "invalid_credentials"
			| "refresh_token_not_found"
			| "refresh_token_already_used"
			| "session_not_found"
			| "bad_code_verifier"
			| "flow_state_not_found"
			| "flow_state_expired",
		) => return BackendErrorKind::InvalidGrant,
		Some("user_already_exists" | "email_exists") => return BackendErrorKind::AlreadyRegistered,
		_ => {},
	}

	if body.message(status).to_ascii_lowercase().contains("already registered") {
		return BackendErrorKind::AlreadyRegistered;
	}

	match status {
		401 => BackendErrorKind::Unauthorized,
		403 => BackendErrorKind::Forbidden,
		404 => BackendErrorKind::NotFound,
		408 => BackendErrorKind::Timeout,
		// Rate limiting is transient; reuse the server bucket so callers back off.
		429 => BackendErrorKind::Server { status },
		_ => BackendErrorKind::Other,
	}
}

fn map_reqwest_error(operation: &'static str, err: ReqwestError) -> BackendError {
	let kind = if err.is_timeout() { BackendErrorKind::Timeout } else { BackendErrorKind::Network };

	BackendError::new(operation, kind, err.to_string())
}

fn decode<T>(operation: &'static str, bytes: &[u8]) -> Result<T, BackendError>
where
	T: DeserializeOwned,
{
	serde_json::from_slice(bytes).map_err(|e| {
		BackendError::new(
			operation,
			BackendErrorKind::Other,
			format!("Response body could not be decoded: {e}"),
		)
	})
}

fn decode_claims(token: &str) -> Option<JwtClaims> {
	let payload = token.split('.').nth(1)?;
	let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;

	serde_json::from_slice(&bytes).ok()
}

fn single_row(operation: &'static str, rows: Vec<Profile>) -> Result<Profile, BackendError> {
	rows.into_iter()
		.next()
		.ok_or_else(|| BackendError::new(operation, BackendErrorKind::NotFound, "No row returned."))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn body(json: serde_json::Value) -> ErrorBody {
		serde_json::from_value(json).expect("Error body fixture should deserialize.")
	}

	#[test]
	fn failures_are_classified_by_status_and_code() {
		assert_eq!(
			classify_failure(503, &ErrorBody::default()),
			BackendErrorKind::Server { status: 503 }
		);
		assert_eq!(
			classify_failure(409, &body(serde_json::json!({ "code": "23505", "message": "dup" }))),
			BackendErrorKind::UniqueViolation
		);
		assert_eq!(
			classify_failure(
				400,
				&body(serde_json::json!({ "error": "invalid_grant", "error_description": "nope" }))
			),
			BackendErrorKind::InvalidGrant
		);
		assert_eq!(
			classify_failure(
				422,
				&body(serde_json::json!({ "code": 422, "msg": "User already registered" }))
			),
			BackendErrorKind::AlreadyRegistered
		);
		assert_eq!(classify_failure(401, &ErrorBody::default()), BackendErrorKind::Unauthorized);
		assert_eq!(classify_failure(418, &ErrorBody::default()), BackendErrorKind::Other);
	}

	#[test]
	fn jwt_claims_are_decoded_without_verification() {
		let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"user-1","exp":1700000000}"#);
		let token = format!("header.{payload}.signature");
		let claims = decode_claims(&token).expect("Claims should decode.");

		assert_eq!(claims.exp, Some(1_700_000_000));
		assert!(decode_claims("not-a-jwt").is_none());
	}

	#[test]
	fn sign_up_response_distinguishes_sessions_from_pending_users() {
		let pending: SignUpResponse =
			serde_json::from_value(serde_json::json!({ "id": "user-1", "email": "a@b.co" }))
				.expect("Pending sign-up should deserialize.");

		assert!(matches!(pending, SignUpResponse::User(_)));

		let signed_in: SignUpResponse = serde_json::from_value(serde_json::json!({
			"access_token": "a",
			"refresh_token": "r",
			"expires_in": 3600,
			"user": { "id": "user-1" }
		}))
		.expect("Immediate sign-up should deserialize.");

		assert!(matches!(signed_in, SignUpResponse::Session(_)));
	}
}
