//! Client session refresh against mocked token and API endpoints.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use chrono::TimeDelta;
use portal_auth::{
	AuthFailure, Clock, Error, JitterStrategy, ManualClock, RetryPolicy, SessionClient,
	SessionConfig, SessionCoordinator, SessionTokens,
	session::{MemorySessionStorage, SessionEvent},
};
use reqwest::StatusCode;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{body_string_contains, header, method, path},
};
// self
use crate::common::{self, PRIMARY};

const API_PATH: &str = "/api/resources";

struct Harness {
	idp: MockServer,
	api: MockServer,
	clock: Arc<ManualClock>,
	client: SessionClient,
	held: String,
}
impl Harness {
	async fn signed_in_for(seconds: i64) -> Self {
		let idp = MockServer::start().await;
		let api = MockServer::start().await;
		let clock = ManualClock::starting_now();
		let held = common::sign(&PRIMARY, "k1", "analyst-1", clock.now() + TimeDelta::seconds(seconds));
		let storage = MemorySessionStorage::with_tokens(SessionTokens::from_pair(&held, "refresh-0"));
		let config = SessionConfig::new(
			format!("{}/token", idp.uri()),
			"portal",
			"https://portal.example.mil/login",
		)
		.expect("session config")
		.with_require_https(false)
		.with_retry_policy(RetryPolicy {
			max_retries: 1,
			attempt_timeout: Duration::from_secs(5),
			initial_backoff: Duration::from_millis(1),
			max_backoff: Duration::from_millis(2),
			deadline: Duration::from_secs(10),
			jitter: JitterStrategy::None,
		});
		let coordinator = SessionCoordinator::http(config, Arc::new(storage), clock.clone())
			.expect("coordinator");

		coordinator.initialize().await.expect("initialize");

		Self { idp, api, clock, client: SessionClient::new(reqwest::Client::new(), coordinator), held }
	}

	/// Serve one successful refresh and return the access token it grants.
	async fn grant_once(&self) -> String {
		let fresh =
			common::sign(&PRIMARY, "k1", "analyst-1", self.clock.now() + TimeDelta::minutes(15));

		Mock::given(method("POST"))
			.and(path("/token"))
			.and(body_string_contains("refresh_token=refresh-0"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"access_token": fresh,
				"refresh_token": "refresh-1",
				"expires_in": 900,
				"token_type": "Bearer",
			})))
			.expect(1)
			.mount(&self.idp)
			.await;

		fresh
	}

	fn url(&self) -> String {
		format!("{}{API_PATH}", self.api.uri())
	}
}

fn bearer(token: &str) -> String {
	format!("Bearer {token}")
}

#[tokio::test]
async fn concurrent_requests_share_one_refresh() {
	let _ = tracing_subscriber::fmt::try_init();
	let harness = Harness::signed_in_for(20).await;
	let fresh = harness.grant_once().await;

	Mock::given(method("GET"))
		.and(path(API_PATH))
		.and(header("authorization", bearer(&fresh).as_str()))
		.respond_with(ResponseTemplate::new(200))
		.expect(10)
		.mount(&harness.api)
		.await;

	let requests = (0..10).map(|_| {
		let client = harness.client.clone();
		let url = harness.url();

		tokio::spawn(async move { client.get(url).await })
	});

	for response in futures::future::join_all(requests).await {
		assert_eq!(response.expect("joined").expect("response").status(), StatusCode::OK);
	}

	assert_eq!(harness.client.coordinator().access_token(), Some(fresh));
}

#[tokio::test]
async fn unauthorized_response_refreshes_and_retries_once() {
	let harness = Harness::signed_in_for(600).await;
	let fresh = harness.grant_once().await;

	Mock::given(method("GET"))
		.and(path(API_PATH))
		.and(header("authorization", bearer(&harness.held).as_str()))
		.respond_with(ResponseTemplate::new(401))
		.expect(1)
		.mount(&harness.api)
		.await;
	Mock::given(method("GET"))
		.and(path(API_PATH))
		.and(header("authorization", bearer(&fresh).as_str()))
		.respond_with(ResponseTemplate::new(200))
		.expect(1)
		.mount(&harness.api)
		.await;

	let response = harness.client.get(harness.url()).await.expect("response");

	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn rejected_refresh_requires_reauthentication() {
	let harness = Harness::signed_in_for(20).await;
	let events = harness.client.coordinator().subscribe();

	Mock::given(method("POST"))
		.and(path("/token"))
		.respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
			"error": "invalid_grant",
			"error_description": "Token is not active",
		})))
		.expect(1)
		.mount(&harness.idp)
		.await;
	Mock::given(method("GET"))
		.and(path(API_PATH))
		.respond_with(ResponseTemplate::new(200))
		.expect(0)
		.mount(&harness.api)
		.await;

	let outcome = harness.client.get(harness.url()).await;

	assert!(matches!(outcome, Err(Error::Auth(AuthFailure::RefreshFailed { .. }))));
	assert!(matches!(*events.borrow(), SessionEvent::ReauthRequired { .. }));
	assert_eq!(harness.client.coordinator().access_token(), None);

	// Parked until a new login; no further exchanges.
	assert!(harness.client.get(harness.url()).await.is_err());
}

#[tokio::test]
async fn refresh_now_advisory_starts_a_background_refresh() {
	let harness = Harness::signed_in_for(600).await;
	let fresh = harness.grant_once().await;
	let mut events = harness.client.coordinator().subscribe();

	Mock::given(method("GET"))
		.and(path(API_PATH))
		.respond_with(ResponseTemplate::new(200).insert_header("x-token-refresh-now", "true"))
		.expect(1)
		.mount(&harness.api)
		.await;

	let response = harness.client.get(harness.url()).await.expect("response");

	assert_eq!(response.status(), StatusCode::OK);

	tokio::time::timeout(Duration::from_secs(5), events.changed())
		.await
		.expect("refresh within timeout")
		.expect("event");

	assert!(matches!(*events.borrow(), SessionEvent::Refreshed { .. }));
	assert_eq!(harness.client.coordinator().access_token(), Some(fresh));
}
