//! Metrics helpers and per-component telemetry bookkeeping.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 2]>;

const METRIC_KEY_LOOKUPS_TOTAL: &str = "portal_auth_key_lookups_total";
const METRIC_KEY_FETCH_TOTAL: &str = "portal_auth_key_fetch_total";
const METRIC_KEY_FETCH_DURATION: &str = "portal_auth_key_fetch_duration_seconds";
const METRIC_GATE_DECISIONS_TOTAL: &str = "portal_auth_gate_decisions_total";
const METRIC_REVOCATIONS_TOTAL: &str = "portal_auth_revocations_total";
const METRIC_SESSION_REFRESH_TOTAL: &str = "portal_auth_session_refresh_total";
const METRIC_SESSION_REFRESH_DURATION: &str = "portal_auth_session_refresh_duration_seconds";

#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe telemetry accumulator for a key cache.
#[derive(Debug, Default)]
pub struct KeyCacheMetrics {
	lookups: AtomicU64,
	hits: AtomicU64,
	stale_serves: AtomicU64,
	fetch_successes: AtomicU64,
	fetch_errors: AtomicU64,
	last_fetch_micros: AtomicU64,
}
impl KeyCacheMetrics {
	/// Create a new accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a lookup answered from the cache.
	pub fn record_hit(&self) {
		self.lookups.fetch_add(1, Ordering::Relaxed);
		self.hits.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a lookup that needed a fetch.
	pub fn record_miss(&self) {
		self.lookups.fetch_add(1, Ordering::Relaxed);
	}

	/// Record an expired key served because the endpoint was unreachable.
	pub fn record_stale_serve(&self) {
		self.stale_serves.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a successful fetch and its latency.
	pub fn record_fetch_success(&self, duration: Duration) {
		self.fetch_successes.fetch_add(1, Ordering::Relaxed);
		self.last_fetch_micros
			.store(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX), Ordering::Relaxed);
	}

	/// Record a failed fetch.
	pub fn record_fetch_error(&self) {
		self.fetch_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Point-in-time snapshot.
	pub fn snapshot(&self) -> KeyCacheMetricsSnapshot {
		KeyCacheMetricsSnapshot {
			lookups: self.lookups.load(Ordering::Relaxed),
			hits: self.hits.load(Ordering::Relaxed),
			stale_serves: self.stale_serves.load(Ordering::Relaxed),
			fetch_successes: self.fetch_successes.load(Ordering::Relaxed),
			fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
			last_fetch_micros: match self.last_fetch_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of key cache counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyCacheMetricsSnapshot {
	/// Lookups observed.
	pub lookups: u64,
	/// Lookups answered from the cache.
	pub hits: u64,
	/// Expired keys served during an outage.
	pub stale_serves: u64,
	/// Successful fetches.
	pub fetch_successes: u64,
	/// Failed fetches.
	pub fetch_errors: u64,
	/// Latency of the most recent successful fetch.
	pub last_fetch_micros: Option<u64>,
}
impl KeyCacheMetricsSnapshot {
	/// Fraction of lookups answered from the cache.
	pub fn hit_rate(&self) -> f64 {
		if self.lookups == 0 { 0.0 } else { self.hits as f64 / self.lookups as f64 }
	}
}

/// Thread-safe telemetry accumulator for the authentication gate.
#[derive(Debug, Default)]
pub struct GateMetrics {
	requests: AtomicU64,
	admitted: AtomicU64,
	rejected: AtomicU64,
	cache_hits: AtomicU64,
	verifications: AtomicU64,
	revocations: AtomicU64,
}
impl GateMetrics {
	/// Create a new accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record an incoming request.
	pub fn record_request(&self) {
		self.requests.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a validation cache hit.
	pub fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a full signature verification.
	pub fn record_verification(&self) {
		self.verifications.fetch_add(1, Ordering::Relaxed);
	}

	/// Record an admission.
	pub fn record_admitted(&self) {
		self.admitted.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a rejection.
	pub fn record_rejected(&self) {
		self.rejected.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a logout revocation.
	pub fn record_revocation(&self) {
		self.revocations.fetch_add(1, Ordering::Relaxed);
	}

	/// Point-in-time snapshot.
	pub fn snapshot(&self) -> GateMetricsSnapshot {
		GateMetricsSnapshot {
			requests: self.requests.load(Ordering::Relaxed),
			admitted: self.admitted.load(Ordering::Relaxed),
			rejected: self.rejected.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			verifications: self.verifications.load(Ordering::Relaxed),
			revocations: self.revocations.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of gate counters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GateMetricsSnapshot {
	/// Requests seen.
	pub requests: u64,
	/// Requests admitted.
	pub admitted: u64,
	/// Requests rejected.
	pub rejected: u64,
	/// Outcomes served from the validation cache.
	pub cache_hits: u64,
	/// Full signature verifications performed.
	pub verifications: u64,
	/// Tokens revoked via logout.
	pub revocations: u64,
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a key lookup answered from the cache.
pub fn record_key_hit() {
	metrics::counter!(METRIC_KEY_LOOKUPS_TOTAL, labels("result", "hit").iter()).increment(1);
}

/// Record a key lookup that required a fetch.
pub fn record_key_miss() {
	metrics::counter!(METRIC_KEY_LOOKUPS_TOTAL, labels("result", "miss").iter()).increment(1);
}

/// Record a successful key document fetch along with its latency.
pub fn record_key_fetch_success(duration: Duration) {
	metrics::counter!(METRIC_KEY_FETCH_TOTAL, labels("status", "success").iter()).increment(1);
	metrics::histogram!(METRIC_KEY_FETCH_DURATION).record(duration.as_secs_f64());
}

/// Record a failed key document fetch.
pub fn record_key_fetch_error() {
	metrics::counter!(METRIC_KEY_FETCH_TOTAL, labels("status", "error").iter()).increment(1);
}

/// Record an admitted request, tagged by where the outcome came from (`cache` or `verified`).
pub fn record_admission(source: &'static str) {
	let mut labels = labels("decision", "admitted");

	labels.push(Label::new("source", source));

	metrics::counter!(METRIC_GATE_DECISIONS_TOTAL, labels.iter()).increment(1);
}

/// Record a rejected request, tagged with the failure code.
pub fn record_rejection(kind: &'static str) {
	let mut labels = labels("decision", "rejected");

	labels.push(Label::new("kind", kind));

	metrics::counter!(METRIC_GATE_DECISIONS_TOTAL, labels.iter()).increment(1);
}

/// Record a token revocation.
pub fn record_revocation() {
	metrics::counter!(METRIC_REVOCATIONS_TOTAL).increment(1);
}

/// Record a finished client refresh flight (`success` or `reauth_required`).
pub fn record_session_refresh(status: &'static str, duration: Duration) {
	metrics::counter!(METRIC_SESSION_REFRESH_TOTAL, labels("status", status).iter()).increment(1);
	metrics::histogram!(METRIC_SESSION_REFRESH_DURATION).record(duration.as_secs_f64());
}

fn labels(key: &'static str, value: &'static str) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new(key, value));

	labels
}
