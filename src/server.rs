//! Axum wiring for the gate: rejection rendering, middleware, advisory layer, and auth routes.

pub mod advisory;
pub mod middleware;
pub mod routes;

// crates.io
use axum::{
	Json, Router,
	http::{HeaderValue, StatusCode, header::WWW_AUTHENTICATE},
	response::{IntoResponse, Response},
};
use serde::Serialize;
use tower::ServiceBuilder;
// self
use crate::{_prelude::*, failure::AuthFailure, gate::AuthGate};

#[derive(Serialize)]
struct ErrorBody {
	error: &'static str,
	message: String,
}

impl IntoResponse for AuthFailure {
	fn into_response(self) -> Response {
		let status = self.status();
		let challenge = match self {
			Self::MissingToken => HeaderValue::from_static("Bearer"),
			_ => HeaderValue::from_static(r#"Bearer error="invalid_token""#),
		};
		let mut response =
			(status, Json(ErrorBody { error: self.code(), message: self.to_string() }))
				.into_response();

		if status == StatusCode::UNAUTHORIZED {
			response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
		}

		response
	}
}

/// Wrap `app` with the gate and expiry advisory, and mount the auth routes.
///
/// The advisory layer is outermost so rejected responses carry it too.
pub fn protect(app: Router, gate: Arc<AuthGate>) -> Router {
	let clock = gate.clock().clone();

	app.merge(routes::router(gate.clone())).layer(
		ServiceBuilder::new()
			.layer(axum::middleware::from_fn_with_state(clock, advisory::annotate_expiry))
			.layer(axum::middleware::from_fn_with_state(gate, middleware::require_auth)),
	)
}

/// Router serving only the auth routes behind the gate.
pub fn router(gate: Arc<AuthGate>) -> Router {
	protect(Router::new(), gate)
}
