//! Refresh-token exchange against the identity provider's token endpoint.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;
// self
use crate::{_prelude::*, config::SessionConfig, http::client};

/// Successful token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
	/// New access token.
	pub access_token: String,
	/// Rotated refresh token; absent when the provider keeps the old one valid.
	#[serde(default)]
	pub refresh_token: Option<String>,
	/// Access token lifetime in seconds.
	#[serde(default)]
	pub expires_in: Option<u64>,
	/// Usually `Bearer`.
	#[serde(default)]
	pub token_type: Option<String>,
}
impl Debug for TokenGrant {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("TokenGrant")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("expires_in", &self.expires_in)
			.field("token_type", &self.token_type)
			.finish()
	}
}

/// Why an exchange did not produce a grant.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
	/// The provider refused the refresh token; retrying cannot help.
	#[error("Refresh rejected by the identity provider: {error}")]
	Rejected {
		/// OAuth2 error code, e.g. `invalid_grant`.
		error: String,
		/// Provider's description.
		description: Option<String>,
	},
	/// The endpoint could not be reached or failed on its side.
	#[error("Token endpoint unavailable: {0}")]
	Unavailable(String),
}
impl ExchangeError {
	/// Whether another attempt may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Unavailable(_))
	}
}

/// Exchanges refresh tokens for new pairs.
#[async_trait]
pub trait TokenEndpoint: Debug + Send + Sync {
	/// Perform one `grant_type=refresh_token` exchange.
	async fn refresh(&self, refresh_token: &str) -> std::result::Result<TokenGrant, ExchangeError>;
}

#[derive(Deserialize)]
struct OAuthErrorBody {
	error: String,
	#[serde(default)]
	error_description: Option<String>,
}

/// [`TokenEndpoint`] speaking the OAuth2 form-encoded protocol.
#[derive(Clone)]
pub struct HttpTokenEndpoint {
	client: Client,
	endpoint: Url,
	client_id: String,
	client_secret: Option<String>,
}
impl HttpTokenEndpoint {
	/// Endpoint described by `config`, with a client that refuses insecure redirects.
	pub fn new(config: &SessionConfig) -> Result<Self> {
		config.validate()?;

		let client = client::upstream_client(
			config.require_https,
			&[],
			3,
			config.retry_policy.attempt_timeout,
		)?;

		Ok(Self::with_client(config, client))
	}

	/// Endpoint using a caller-supplied client.
	pub fn with_client(config: &SessionConfig, client: Client) -> Self {
		Self {
			client,
			endpoint: config.token_endpoint.clone(),
			client_id: config.client_id.clone(),
			client_secret: config.client_secret.clone(),
		}
	}
}
impl Debug for HttpTokenEndpoint {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("HttpTokenEndpoint")
			.field("endpoint", &self.endpoint.as_str())
			.field("client_id", &self.client_id)
			.finish_non_exhaustive()
	}
}
#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
	async fn refresh(&self, refresh_token: &str) -> std::result::Result<TokenGrant, ExchangeError> {
		let mut form = vec![
			("grant_type", "refresh_token"),
			("refresh_token", refresh_token),
			("client_id", self.client_id.as_str()),
		];

		if let Some(secret) = &self.client_secret {
			form.push(("client_secret", secret.as_str()));
		}

		let response = self
			.client
			.post(self.endpoint.clone())
			.form(&form)
			.send()
			.await
			.map_err(|err| ExchangeError::Unavailable(err.to_string()))?;
		let status = response.status();

		if status.is_success() {
			return response
				.json::<TokenGrant>()
				.await
				.map_err(|err| ExchangeError::Unavailable(format!("Unreadable grant: {err}.")));
		}
		if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
			return Err(ExchangeError::Unavailable(format!("HTTP {status}")));
		}

		let body = response.bytes().await.unwrap_or_default();

		match serde_json::from_slice::<OAuthErrorBody>(&body) {
			Ok(OAuthErrorBody { error, error_description }) =>
				Err(ExchangeError::Rejected { error, description: error_description }),
			Err(_) => Err(ExchangeError::Rejected {
				error: format!("http_{}", status.as_u16()),
				description: None,
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use wiremock::{
		Mock, MockServer, ResponseTemplate,
		matchers::{body_string_contains, method, path},
	};
	// self
	use super::*;

	async fn endpoint(server: &MockServer) -> HttpTokenEndpoint {
		let config = SessionConfig::new(
			format!("{}/token", server.uri()),
			"portal",
			"https://portal.example.mil/login",
		)
		.expect("config")
		.with_require_https(false);

		HttpTokenEndpoint::new(&config).expect("endpoint")
	}

	#[tokio::test]
	async fn exchanges_refresh_token() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/token"))
			.and(body_string_contains("grant_type=refresh_token"))
			.and(body_string_contains("refresh_token=r-1"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"access_token": "a-2",
				"refresh_token": "r-2",
				"expires_in": 900,
				"token_type": "Bearer",
			})))
			.expect(1)
			.mount(&server)
			.await;

		let grant = endpoint(&server).await.refresh("r-1").await.expect("grant");

		assert_eq!(grant.access_token, "a-2");
		assert_eq!(grant.refresh_token.as_deref(), Some("r-2"));
	}

	#[tokio::test]
	async fn invalid_grant_is_not_retryable() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
				"error": "invalid_grant",
				"error_description": "Token is not active",
			})))
			.mount(&server)
			.await;

		let err = endpoint(&server).await.refresh("r-1").await.expect_err("rejected");

		assert_eq!(
			err,
			ExchangeError::Rejected {
				error: "invalid_grant".into(),
				description: Some("Token is not active".into()),
			}
		);
		assert!(!err.is_retryable());
	}

	#[tokio::test]
	async fn server_errors_are_retryable() {
		let server = MockServer::start().await;

		Mock::given(method("POST")).respond_with(ResponseTemplate::new(502)).mount(&server).await;

		assert!(endpoint(&server).await.refresh("r-1").await.expect_err("down").is_retryable());
	}
}
