//! Key resolution against a mocked key-publishing endpoint.

// std
use std::time::Duration;
// crates.io
use portal_auth::{AuthFailure, KeyCache, ManualClock, keys::KeyState};
// self
use crate::common::{self, PRIMARY, SECONDARY};

#[tokio::test]
async fn one_fetch_installs_every_published_key() {
	let _ = tracing_subscriber::fmt::try_init();
	let server = common::key_server(&[(&PRIMARY, "k1"), (&SECONDARY, "k2")], 1).await;
	let clock = ManualClock::starting_now();
	let cache = KeyCache::http(common::key_config(&server), clock.clone()).expect("key cache");
	let resolves = (0..8).map(|i| {
		let cache = &cache;

		async move { cache.resolve(if i % 2 == 0 { "k1" } else { "k2" }).await }
	});

	for resolved in futures::future::join_all(resolves).await {
		resolved.expect("key resolved");
	}

	let status = cache.status();

	assert_eq!(status.len(), 2);
	assert!(status.iter().all(|key| key.state == KeyState::Ready));
	assert_eq!(status[0].kid, "k1");
	assert_eq!(status[0].algorithm.as_deref(), Some("EdDSA"));
	assert_eq!(cache.metrics().snapshot().fetch_successes, 1);
}

#[tokio::test]
async fn unknown_kid_waits_out_the_cooldown() {
	let server = common::key_server(&[(&PRIMARY, "k1")], 2).await;
	let clock = ManualClock::starting_now();
	let cache = KeyCache::http(common::key_config(&server), clock.clone()).expect("key cache");

	cache.resolve("k1").await.expect("k1");

	for _ in 0..3 {
		let failure = cache.resolve("k9").await.expect_err("unknown kid");

		assert!(matches!(failure, AuthFailure::KeyResolution { transient: false, .. }));
	}

	clock.advance(Duration::from_secs(31));

	// Past the cooldown the endpoint is consulted once more.
	assert!(cache.resolve("k9").await.is_err());
	assert!(cache.resolve("k1").await.is_ok());
	assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn expired_keys_are_fetched_again() {
	let server = common::key_server(&[(&PRIMARY, "k1")], 2).await;
	let clock = ManualClock::starting_now();
	let cache = KeyCache::http(common::key_config(&server), clock.clone()).expect("key cache");

	assert_eq!(cache.prime().await.expect("primed"), 1);

	clock.advance(Duration::from_secs(301));

	assert_eq!(cache.status()[0].state, KeyState::Expired);

	cache.resolve("k1").await.expect("refetched");

	assert_eq!(cache.status()[0].state, KeyState::Ready);
}
