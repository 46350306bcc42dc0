//! Concurrent signing-key cache with per-`kid` single-flight fetches.

// std
use std::sync::atomic::{AtomicI64, Ordering};
// crates.io
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
// self
use crate::{
	_prelude::*,
	clock::SharedClock,
	config::{DEFAULT_STALE_WHILE_ERROR, DEFAULT_UNKNOWN_KID_COOLDOWN, KeyCacheConfig},
	failure::AuthFailure,
	http::client::KeyDocument,
	keys::{
		slot::{KeySlot, SigningKey},
		source::{HttpKeySource, KeySource},
	},
	metrics::{self, KeyCacheMetrics},
};

/// Lifecycle of a cached key as reported by [`KeyCache::status`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
	/// A fetch for this `kid` is underway and no key is cached yet.
	Loading,
	/// The key is cached and within its lifetime.
	Ready,
	/// The key outlived its lifetime and will be fetched again on next use.
	Expired,
	/// A fetch is underway while an expired key is still held.
	Refreshing,
}

/// Diagnostic view of one cached `kid`.
#[derive(Clone, Debug, Serialize)]
pub struct KeyStatus {
	/// Key identifier.
	pub kid: String,
	/// Current state.
	pub state: KeyState,
	/// Declared algorithm, if any.
	pub algorithm: Option<String>,
	/// When the key was fetched.
	pub fetched_at: Option<DateTime<Utc>>,
	/// When the key expires.
	pub expires_at: Option<DateTime<Utc>>,
}

/// Signing keys by `kid`, fetched lazily and shared by every verifier.
///
/// A lookup for a cached, unexpired key touches only that key's slot. A miss takes the slot's
/// flight guard, so concurrent misses for the same `kid` produce one fetch, while misses for other
/// `kid`s and hits on cached keys proceed independently. A fetch installs every key in the
/// returned document.
#[derive(Debug)]
pub struct KeyCache {
	source: Arc<dyn KeySource>,
	slots: DashMap<String, Arc<KeySlot>>,
	document_gate: Mutex<()>,
	last_document_millis: AtomicI64,
	stale_while_error: Duration,
	unknown_kid_cooldown: Duration,
	max_keys: usize,
	clock: SharedClock,
	metrics: Arc<KeyCacheMetrics>,
}
impl KeyCache {
	/// Cache over `source` with default grace and cooldown windows.
	pub fn new(source: Arc<dyn KeySource>, clock: SharedClock) -> Self {
		Self {
			source,
			slots: DashMap::new(),
			document_gate: Mutex::new(()),
			last_document_millis: AtomicI64::new(i64::MIN),
			stale_while_error: DEFAULT_STALE_WHILE_ERROR,
			unknown_kid_cooldown: DEFAULT_UNKNOWN_KID_COOLDOWN,
			max_keys: 32,
			clock,
			metrics: KeyCacheMetrics::new(),
		}
	}

	/// Cache over `source` using the windows from `config`.
	pub fn with_config(
		config: &KeyCacheConfig,
		source: Arc<dyn KeySource>,
		clock: SharedClock,
	) -> Self {
		Self {
			stale_while_error: config.stale_while_error,
			unknown_kid_cooldown: config.unknown_kid_cooldown,
			max_keys: config.max_keys,
			..Self::new(source, clock)
		}
	}

	/// Override the spacing between fetches caused by unknown `kid`s.
	pub fn with_unknown_kid_cooldown(mut self, cooldown: Duration) -> Self {
		self.unknown_kid_cooldown = cooldown;

		self
	}

	/// Cache fetching from the configured JWKS endpoint over HTTPS.
	pub fn http(config: KeyCacheConfig, clock: SharedClock) -> Result<Self> {
		let source = HttpKeySource::new(config)?;
		let cache = Self::with_config(source.config(), Arc::new(source.clone()), clock);

		Ok(cache)
	}

	/// Per-cache telemetry accumulator.
	pub fn metrics(&self) -> Arc<KeyCacheMetrics> {
		self.metrics.clone()
	}

	/// Resolve the verification key for `kid`.
	///
	/// An unreachable endpoint yields a transient [`AuthFailure::KeyResolution`]; a `kid` absent from
	/// a freshly fetched document yields a non-transient one.
	#[tracing::instrument(skip(self))]
	pub async fn resolve(&self, kid: &str) -> std::result::Result<Arc<SigningKey>, AuthFailure> {
		let now = self.clock.now();
		let existing = self.slots.get(kid).map(|slot| slot.clone());

		if let Some(key) = existing.as_ref().and_then(|slot| slot.fresh(now)) {
			self.observe_hit();

			return Ok(key);
		}
		if self.fetched_within_cooldown(now) && existing.is_none() {
			tracing::debug!("kid absent from recent key document");

			return Err(AuthFailure::unknown_key(kid));
		}

		let slot = match existing {
			Some(slot) => slot,
			None => self.slots.entry(kid.to_owned()).or_default().clone(),
		};
		let _flight = slot.begin_flight().await;
		let now = self.clock.now();

		// Whoever held the flight before us may have installed the key already.
		if let Some(key) = self.fresh_key(kid, now) {
			self.observe_hit();

			return Ok(key);
		}

		// An expired key still held here is refetched regardless of the cooldown; only a `kid` with
		// nothing cached is answered from the recent document.
		let stale = self.slots.get(kid).and_then(|slot| slot.current());

		if stale.is_none() && self.fetched_within_cooldown(now) {
			self.discard_if_empty(kid);

			return Err(AuthFailure::unknown_key(kid));
		}

		let observed = self.last_document_millis.load(Ordering::Acquire);

		self.observe_miss();

		match self.refresh_document(Some(observed)).await {
			Ok(_) => match self.fresh_key(kid, self.clock.now()) {
				Some(key) => Ok(key),
				None => {
					tracing::warn!("kid not published by the identity provider");

					// A retracted key is dropped so later lookups fall under the cooldown.
					self.slots.remove(kid);

					Err(AuthFailure::unknown_key(kid))
				},
			},
			Err(err) => {
				if let Some(key) = stale.filter(|key| key.within_grace(now, self.stale_while_error)) {
					tracing::warn!(error = %err, "key fetch failed, serving expired key within grace");

					self.metrics.record_stale_serve();

					return Ok(key);
				}

				tracing::error!(error = %err, "key fetch failed");

				self.discard_if_empty(kid);

				Err(AuthFailure::key_unavailable(err.to_string()))
			},
		}
	}

	/// Fetch the key document now and install every key in it; returns how many were installed.
	///
	/// Hosts call this at startup so the first request does not pay for the fetch.
	pub async fn prime(&self) -> Result<usize> {
		self.refresh_document(None).await
	}

	/// Per-`kid` diagnostics, sorted by `kid`.
	pub fn status(&self) -> Vec<KeyStatus> {
		let now = self.clock.now();
		let mut statuses = self
			.slots
			.iter()
			.map(|entry| {
				let slot = entry.value();
				let key = slot.current();
				let state = match (&key, slot.in_flight()) {
					(None, _) => KeyState::Loading,
					(Some(key), true) if key.is_expired(now) => KeyState::Refreshing,
					(Some(key), _) if key.is_expired(now) => KeyState::Expired,
					(Some(_), _) => KeyState::Ready,
				};

				KeyStatus {
					kid: entry.key().clone(),
					state,
					algorithm: key.as_ref().and_then(|key| key.algorithm.clone()),
					fetched_at: key.as_ref().map(|key| key.fetched_at),
					expires_at: key.as_ref().map(|key| key.expires_at),
				}
			})
			.collect::<Vec<_>>();

		statuses.sort_by(|a, b| a.kid.cmp(&b.kid));

		statuses
	}

	/// Number of `kid`s with a slot.
	pub fn len(&self) -> usize {
		self.slots.len()
	}

	/// Whether no `kid` has a slot.
	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	/// Fetch and install a document. With `observed`, a document installed by another `kid`'s
	/// fetch while this call waited on the gate is reused instead of fetching again.
	async fn refresh_document(&self, observed: Option<i64>) -> Result<usize> {
		let _gate = self.document_gate.lock().await;

		if observed.is_some_and(|seen| seen != self.last_document_millis.load(Ordering::Acquire)) {
			return Ok(0);
		}

		let started = Instant::now();

		match self.source.fetch().await {
			Ok(document) => {
				let installed = self.install(document);

				self.observe_fetch_success(started.elapsed());

				Ok(installed)
			},
			Err(err) => {
				self.observe_fetch_error();

				Err(err)
			},
		}
	}

	fn install(&self, document: KeyDocument) -> usize {
		let fetched_at = self.clock.now();
		let mut installed = 0;

		for jwk in &document.jwks.keys {
			if installed == self.max_keys {
				tracing::warn!(
					max_keys = self.max_keys,
					published = document.jwks.keys.len(),
					"key document exceeds max_keys; remaining keys ignored"
				);

				break;
			}

			match SigningKey::from_jwk(jwk, fetched_at, document.ttl) {
				Ok(Some(key)) => {
					let key = Arc::new(key);

					self.slots.entry(key.kid.clone()).or_default().replace(key);

					installed += 1;
				},
				Ok(None) => {},
				Err(err) => tracing::warn!(
					kid = jwk.common.key_id.as_deref().unwrap_or_default(),
					error = %err,
					"skipping unusable key"
				),
			}
		}

		self.last_document_millis.store(fetched_at.timestamp_millis(), Ordering::Release);

		tracing::debug!(installed, ttl = ?document.ttl, "key document installed");

		installed
	}

	fn fresh_key(&self, kid: &str, now: DateTime<Utc>) -> Option<Arc<SigningKey>> {
		self.slots.get(kid).and_then(|slot| slot.fresh(now))
	}

	fn fetched_within_cooldown(&self, now: DateTime<Utc>) -> bool {
		let last = self.last_document_millis.load(Ordering::Acquire);
		let cooldown = i64::try_from(self.unknown_kid_cooldown.as_millis()).unwrap_or(i64::MAX);

		last != i64::MIN && now.timestamp_millis().saturating_sub(last) < cooldown
	}

	fn discard_if_empty(&self, kid: &str) {
		self.slots.remove_if(kid, |_, slot| slot.is_empty());
	}

	fn observe_hit(&self) {
		metrics::record_key_hit();

		self.metrics.record_hit();
	}

	fn observe_miss(&self) {
		metrics::record_key_miss();

		self.metrics.record_miss();
	}

	fn observe_fetch_success(&self, duration: Duration) {
		metrics::record_key_fetch_success(duration);

		self.metrics.record_fetch_success(duration);
	}

	fn observe_fetch_error(&self) {
		metrics::record_key_fetch_error();

		self.metrics.record_fetch_error();
	}
}
