//! Gate middleware and the principal extractor.

// crates.io
use axum::{
	extract::{FromRequestParts, Request, State},
	http::{header::AUTHORIZATION, request::Parts},
	middleware::Next,
	response::{IntoResponse, Response},
};
// self
use crate::{
	_prelude::*,
	failure::AuthFailure,
	gate::{Admission, AuthGate},
	principal::Principal,
};

/// Admit the request through `gate` or answer with the rejection.
///
/// On admission the [`Admission`] is inserted into the request extensions.
pub async fn require_auth(
	State(gate): State<Arc<AuthGate>>,
	mut request: Request,
	next: Next,
) -> Response {
	let path = request.uri().path().to_owned();
	// A header that is not visible ASCII is treated like a malformed one.
	let authorization =
		request.headers().get(AUTHORIZATION).map(|value| value.to_str().unwrap_or_default());

	match gate.authenticate(authorization, &path).await {
		Ok(admission) => {
			request.extensions_mut().insert(admission);

			next.run(request).await
		},
		Err(failure) => failure.into_response(),
	}
}

/// Principal admitted for the current request.
#[derive(Clone, Debug)]
pub struct CurrentPrincipal(pub Arc<Principal>);
impl<S> FromRequestParts<S> for CurrentPrincipal
where
	S: Send + Sync,
{
	type Rejection = AuthFailure;

	async fn from_request_parts(
		parts: &mut Parts,
		_state: &S,
	) -> std::result::Result<Self, Self::Rejection> {
		parts
			.extensions
			.get::<Admission>()
			.map(|admission| Self(admission.principal.clone()))
			.ok_or(AuthFailure::MissingToken)
	}
}
