//! Portal auth endpoints: session introspection and logout.

// crates.io
use axum::{
	Extension, Json, Router,
	extract::State,
	http::{HeaderMap, StatusCode, header::AUTHORIZATION},
	routing::{get, post},
};
use serde::Serialize;
// self
use crate::{
	_prelude::*,
	advisory::{ExpiryAdvisory, RefreshPriority},
	failure::AuthFailure,
	gate::{Admission, AdmissionSource, AuthGate},
	principal::Principal,
	token,
};

/// Path of the session introspection route.
pub const SESSION_PATH: &str = "/api/auth/session";
/// Path of the logout route.
pub const LOGOUT_PATH: &str = "/api/auth/logout";

/// Body of `GET /api/auth/session`.
#[derive(Clone, Debug, Serialize)]
pub struct SessionView {
	/// Admitted principal.
	pub principal: Principal,
	/// Token expiry.
	pub expires_at: DateTime<Utc>,
	/// Seconds until expiry.
	pub seconds_remaining: i64,
	/// Refresh urgency.
	pub priority: RefreshPriority,
	/// Whether the request was answered from the validation cache.
	pub source: AdmissionSource,
}

/// Auth routes; must sit behind [`super::middleware::require_auth`].
pub fn router(gate: Arc<AuthGate>) -> Router {
	Router::new().route(SESSION_PATH, get(session)).route(LOGOUT_PATH, post(logout)).with_state(gate)
}

async fn session(
	State(gate): State<Arc<AuthGate>>,
	Extension(admission): Extension<Admission>,
) -> Json<SessionView> {
	let advisory = ExpiryAdvisory::at(admission.claims.exp, gate.clock().now());

	Json(SessionView {
		principal: admission.principal.as_ref().clone(),
		expires_at: admission.claims.expires_at(),
		seconds_remaining: advisory.seconds_remaining,
		priority: advisory.priority,
		source: admission.source,
	})
}

async fn logout(
	State(gate): State<Arc<AuthGate>>,
	Extension(admission): Extension<Admission>,
	headers: HeaderMap,
) -> std::result::Result<StatusCode, AuthFailure> {
	let authorization = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
	let raw = token::extract_bearer(authorization)?;

	gate.revoke(raw);

	tracing::info!(subject = %admission.principal.subject, "logged out");

	Ok(StatusCode::NO_CONTENT)
}
