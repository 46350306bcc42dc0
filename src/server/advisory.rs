//! Response annotation with expiry advisories.

// crates.io
use axum::{
	extract::{Request, State},
	http::header::AUTHORIZATION,
	middleware::Next,
	response::Response,
};
// self
use crate::{advisory::ExpiryAdvisory, clock::SharedClock, token};

/// Attach expiry headers derived from the request's bearer token to the response.
///
/// Requests without a readable `exp` pass through untouched.
pub async fn annotate_expiry(
	State(clock): State<SharedClock>,
	request: Request,
	next: Next,
) -> Response {
	let exp = request
		.headers()
		.get(AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| token::extract_bearer(Some(value)).ok())
		.and_then(|raw| token::peek_times(raw).ok())
		.and_then(|times| times.exp);
	let mut response = next.run(request).await;

	if let Some(exp) = exp {
		ExpiryAdvisory::at(exp, clock.now()).apply(response.headers_mut());
	}

	response
}
