//! Hardened reqwest client and the key document fetch built on it.

// crates.io
use http::{HeaderMap, Response, StatusCode, header::CACHE_CONTROL};
use jsonwebtoken::jwk::JwkSet;
use reqwest::{Client, redirect::Policy};
// self
use crate::{_prelude::*, config::KeyCacheConfig, http::semantics, security};

/// Key document returned by the identity provider.
#[derive(Clone, Debug)]
pub struct KeyDocument {
	/// Parsed key set.
	pub jwks: JwkSet,
	/// Lifetime derived from the response's cache headers and the configured bounds.
	pub ttl: Duration,
	/// Round-trip duration of the fetch.
	pub elapsed: Duration,
}

/// Build a client whose redirects stay within `allowed_domains` and never downgrade to HTTP.
pub fn upstream_client(
	require_https: bool,
	allowed_domains: &[String],
	max_redirects: u8,
	timeout: Duration,
) -> Result<Client> {
	let allowed_domains = allowed_domains.to_vec();
	let redirect = Policy::custom(move |attempt| {
		if attempt.previous().len() >= usize::from(max_redirects) {
			attempt.error("Too many redirects.")
		} else if let Err(err) =
			security::check_upstream(attempt.url(), require_https, &allowed_domains)
		{
			attempt.error(err)
		} else {
			attempt.follow()
		}
	});

	Client::builder()
		.redirect(redirect)
		.user_agent(format!("portal-auth/{}", env!("CARGO_PKG_VERSION")))
		.connect_timeout(Duration::from_secs(5))
		.timeout(timeout)
		.build()
		.map_err(Error::from)
}

/// Fetch and parse the key document described by `config`. One attempt, no retries.
pub async fn fetch_jwks(client: &Client, config: &KeyCacheConfig) -> Result<KeyDocument> {
	security::check_upstream(&config.jwks_url, config.require_https, &config.allowed_domains)?;

	let request = semantics::base_request(&config.jwks_url)?;
	let start = Instant::now();
	let response = client
		.get(config.jwks_url.clone())
		.headers(request.headers().clone())
		.timeout(config.fetch_timeout)
		.send()
		.await?;
	let elapsed = start.elapsed();
	let status = response.status();

	if !status.is_success() {
		let body = response.text().await.ok();

		return Err(Error::HttpStatus { status, url: config.jwks_url.clone(), body });
	}
	if response.content_length().is_some_and(|len| len > config.max_response_bytes) {
		return Err(oversized(response.content_length().unwrap_or_default(), config));
	}

	let headers = response.headers().clone();
	let bytes = response.bytes().await?;

	if bytes.len() as u64 > config.max_response_bytes {
		return Err(oversized(bytes.len() as u64, config));
	}

	let jwks: JwkSet = serde_json::from_slice(&bytes)?;
	let template = response_template(status, &headers)?;
	let ttl = semantics::key_ttl(config, &request, &template, SystemTime::now());

	tracing::debug!(
		url = %config.jwks_url,
		keys = jwks.keys.len(),
		cache_control = cache_control_header(&headers).unwrap_or_default(),
		ttl = ?ttl,
		elapsed = ?elapsed,
		"key document fetched"
	);

	Ok(KeyDocument { jwks, ttl, elapsed })
}

/// `Cache-Control` header as a string, for diagnostics.
pub fn cache_control_header(headers: &HeaderMap) -> Option<String> {
	headers.get(CACHE_CONTROL).and_then(|value| value.to_str().ok()).map(str::to_owned)
}

fn response_template(status: StatusCode, headers: &HeaderMap) -> Result<Response<()>> {
	let mut template = Response::builder().status(status).body(()).map_err(Error::from)?;

	*template.headers_mut() = headers.clone();

	Ok(template)
}

fn oversized(size: u64, config: &KeyCacheConfig) -> Error {
	Error::Validation {
		field: "max_response_bytes",
		reason: format!(
			"Key document of {size} bytes exceeds the configured guard of {limit} bytes.",
			limit = config.max_response_bytes
		),
	}
}
