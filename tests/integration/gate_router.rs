//! The gate, advisory layer, and auth routes served through axum.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use axum::{
	Router,
	body::{self, Body},
	http::{Request, Response, StatusCode, header},
	routing::get,
};
use chrono::TimeDelta;
use portal_auth::{AuthGate, Clock, CurrentPrincipal, ManualClock, server};
use tower::ServiceExt;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::common::{self, PRIMARY};

fn app(gate: Arc<AuthGate>) -> Router {
	let resources = Router::new().route(
		"/api/resources",
		get(|CurrentPrincipal(principal): CurrentPrincipal| async move {
			format!("hello {}", principal.username)
		}),
	);

	server::protect(resources, gate)
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>) -> Response<Body> {
	let mut request = Request::builder().method(method).uri(uri);

	if let Some(token) = token {
		request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
	}

	app.clone().oneshot(request.body(Body::empty()).expect("request")).await.expect("response")
}

async fn json(response: Response<Body>) -> serde_json::Value {
	let bytes = body::to_bytes(response.into_body(), usize::MAX).await.expect("body");

	serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn admits_valid_tokens_and_exposes_the_principal() {
	let _ = tracing_subscriber::fmt::try_init();
	let keys = common::key_server(&[(&PRIMARY, "k1")], 1).await;
	let clock = ManualClock::starting_now();
	let app = app(common::gate(&keys, &clock));
	let token = common::sign(&PRIMARY, "k1", "analyst-7", clock.now() + TimeDelta::seconds(600));
	let response = call(&app, "GET", "/api/resources", Some(&token)).await;

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(response.headers()["x-token-expires-in"], "600");
	assert!(!response.headers().contains_key("x-token-expiring"));

	let bytes = body::to_bytes(response.into_body(), usize::MAX).await.expect("body");

	assert_eq!(&bytes[..], b"hello analyst-7-user");

	let session = json(call(&app, "GET", "/api/auth/session", Some(&token)).await).await;

	assert_eq!(session["principal"]["subject"], "analyst-7");
	assert_eq!(session["principal"]["clearance"], "SECRET");
	assert_eq!(session["source"], "cache");
	assert_eq!(session["priority"], "fresh");
}

#[tokio::test]
async fn near_expiry_tokens_are_flagged_for_refresh() {
	let keys = common::key_server(&[(&PRIMARY, "k1")], 1).await;
	let clock = ManualClock::starting_now();
	let app = app(common::gate(&keys, &clock));
	let token = common::sign(&PRIMARY, "k1", "analyst-8", clock.now() + TimeDelta::seconds(20));
	let response = call(&app, "GET", "/api/resources", Some(&token)).await;
	let headers = response.headers();

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(headers["x-token-expires-in"], "20");
	assert_eq!(headers["x-token-expiring"], "true");
	assert_eq!(headers["x-token-refresh-priority"], "critical");
	assert_eq!(headers["x-token-refresh-now"], "true");
}

#[tokio::test]
async fn missing_and_expired_tokens_are_challenged() {
	let keys = common::key_server(&[(&PRIMARY, "k1")], 0).await;
	let clock = ManualClock::starting_now();
	let app = app(common::gate(&keys, &clock));
	let missing = call(&app, "GET", "/api/resources", None).await;

	assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
	assert_eq!(missing.headers()[header::WWW_AUTHENTICATE], "Bearer");
	assert_eq!(json(missing).await["error"], "missing_token");

	let expired = common::sign(&PRIMARY, "k1", "analyst-9", clock.now() - TimeDelta::seconds(5));
	let response = call(&app, "GET", "/api/resources", Some(&expired)).await;

	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
	assert_eq!(response.headers()[header::WWW_AUTHENTICATE], r#"Bearer error="invalid_token""#);
	assert_eq!(response.headers()["x-token-expires-in"], "0");
	assert_eq!(json(response).await["error"], "token_expired");
}

#[tokio::test]
async fn logout_revokes_the_presented_token() {
	let keys = common::key_server(&[(&PRIMARY, "k1")], 1).await;
	let clock = ManualClock::starting_now();
	let gate = common::gate(&keys, &clock);
	let app = app(gate.clone());
	let token = common::sign(&PRIMARY, "k1", "analyst-10", clock.now() + TimeDelta::minutes(15));

	assert_eq!(call(&app, "GET", "/api/resources", Some(&token)).await.status(), StatusCode::OK);
	assert_eq!(
		call(&app, "POST", "/api/auth/logout", Some(&token)).await.status(),
		StatusCode::NO_CONTENT
	);

	let response = call(&app, "GET", "/api/resources", Some(&token)).await;

	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
	assert_eq!(json(response).await["error"], "token_revoked");
	assert_eq!(gate.metrics().snapshot().revocations, 1);

	// A fresh token for the same subject is unaffected.
	clock.advance(Duration::from_secs(1));

	let other = common::sign(&PRIMARY, "k1", "analyst-10", clock.now() + TimeDelta::minutes(15));

	assert_eq!(call(&app, "GET", "/api/resources", Some(&other)).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn unreachable_key_endpoint_is_service_unavailable() {
	let keys = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(common::JWKS_PATH))
		.respond_with(ResponseTemplate::new(503))
		.mount(&keys)
		.await;

	let clock = ManualClock::starting_now();
	let app = app(common::gate(&keys, &clock));
	let token = common::sign(&PRIMARY, "k1", "analyst-11", clock.now() + TimeDelta::minutes(15));
	let response = call(&app, "GET", "/api/resources", Some(&token)).await;

	assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
	assert!(!response.headers().contains_key(header::WWW_AUTHENTICATE));
	assert_eq!(json(response).await["error"], "key_resolution_error");
}
