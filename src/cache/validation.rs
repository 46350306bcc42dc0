//! Memoised verification outcomes keyed by token fingerprint.

// self
use crate::{
	_prelude::*,
	cache::bounded::BoundedTtlCache,
	clock::{self, SharedClock},
	failure::AuthFailure,
	token::{TokenClaims, TokenFingerprint},
};

/// Cached result of verifying a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationOutcome {
	/// The token verified; claims are shared with every later hit.
	Valid(Arc<TokenClaims>),
	/// The token failed verification for a non-transient reason.
	Invalid(AuthFailure),
}

/// Validation result cache bounded by each token's own expiry.
///
/// Successful outcomes live until `exp - skew`; failures live for a short fixed TTL so a token
/// that may become valid later (for example after clock sync) is not buried permanently.
#[derive(Debug)]
pub struct ValidationCache {
	entries: BoundedTtlCache<TokenFingerprint, ValidationOutcome>,
	skew: Duration,
	negative_ttl: Duration,
}
impl ValidationCache {
	/// Create a cache with the given capacity, skew margin, and negative TTL.
	pub fn new(capacity: usize, skew: Duration, negative_ttl: Duration, clock: SharedClock) -> Self {
		Self { entries: BoundedTtlCache::new(capacity, clock), skew, negative_ttl }
	}

	/// Look up a live outcome for the token.
	pub fn get(&self, token: &TokenFingerprint) -> Option<ValidationOutcome> {
		self.entries.get(token)
	}

	/// Store an outcome with an explicit TTL.
	pub fn put(&self, token: TokenFingerprint, outcome: ValidationOutcome, ttl: Duration) {
		self.entries.insert(token, outcome, ttl);
	}

	/// Cache verified claims until `exp - skew`; returns the TTL used, if any was positive.
	pub fn record_success(
		&self,
		token: TokenFingerprint,
		claims: Arc<TokenClaims>,
	) -> Option<Duration> {
		let ttl = self.success_ttl(&claims)?;

		self.put(token, ValidationOutcome::Valid(claims), ttl);

		Some(ttl)
	}

	/// Cache a failure for the negative TTL. Transient failures are not cached.
	pub fn record_failure(&self, token: TokenFingerprint, failure: AuthFailure) -> bool {
		if failure.is_transient() || self.negative_ttl.is_zero() {
			return false;
		}

		self.put(token, ValidationOutcome::Invalid(failure), self.negative_ttl);

		true
	}

	/// Drop any cached outcome for the token.
	pub fn invalidate(&self, token: &TokenFingerprint) {
		self.entries.remove(token);
	}

	/// Drop expired outcomes.
	pub fn purge_expired(&self) -> usize {
		self.entries.purge_expired()
	}

	/// Number of stored outcomes.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether the cache is empty.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn success_ttl(&self, claims: &TokenClaims) -> Option<Duration> {
		let skew = TimeDelta::from_std(self.skew).ok()?;
		let deadline = claims.expires_at().checked_sub_signed(skew)?;

		clock::remaining(self.entries.clock().now(), deadline)
	}
}
