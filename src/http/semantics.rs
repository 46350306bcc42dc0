//! Cache lifetime of a key document, derived from standard HTTP caching headers.

// crates.io
use http::{Method, Request, Response, Uri, header::ACCEPT};
use http_cache_semantics::CachePolicy;
use url::Url;
// self
use crate::{_prelude::*, config::KeyCacheConfig};

/// Baseline GET request for a key endpoint, used to evaluate cache semantics.
pub fn base_request(url: &Url) -> Result<Request<()>> {
	let uri = url.as_str().parse::<Uri>().map_err(|err| Error::Validation {
		field: "jwks_url",
		reason: format!("Failed to convert URL to http::Uri: {err}."),
	})?;

	Request::builder()
		.method(Method::GET)
		.uri(uri)
		.header(ACCEPT, "application/json")
		.body(())
		.map_err(Error::from)
}

/// Lifetime for keys from a successful response.
///
/// No caching headers yields `default_ttl`; a non-storable response (`no-store`, `private`) yields
/// `min_ttl`; anything else is clamped into `[min_ttl, max_ttl]`.
pub fn key_ttl(
	config: &KeyCacheConfig,
	request: &Request<()>,
	response: &Response<()>,
	now: SystemTime,
) -> Duration {
	let policy = CachePolicy::new(request, response);

	if !policy.is_storable() {
		return config.min_ttl;
	}

	match policy.time_to_live(now) {
		ttl if ttl.is_zero() => config.default_ttl,
		ttl => config.clamp_ttl(ttl),
	}
}
