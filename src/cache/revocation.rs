//! Short-lived denylist of tokens revoked before their natural expiry.

// self
use crate::{
	_prelude::*,
	cache::bounded::BoundedTtlCache,
	clock::{self, SharedClock},
	token::{self, TokenFingerprint},
};

/// Revoked-token set consulted before any validation cache lookup.
///
/// An entry lives for the token's remaining lifetime, capped at `max_ttl`. Once the token has
/// expired naturally the verifier rejects it anyway, so nothing needs to be remembered past `exp`.
#[derive(Debug)]
pub struct RevocationList {
	entries: BoundedTtlCache<TokenFingerprint, DateTime<Utc>>,
	max_ttl: Duration,
}
impl RevocationList {
	/// Create a revocation list.
	pub fn new(capacity: usize, max_ttl: Duration, clock: SharedClock) -> Self {
		Self { entries: BoundedTtlCache::new(capacity, clock), max_ttl }
	}

	/// Revoke a raw token, reading its expiry from the payload.
	///
	/// Tokens without a readable `exp` are remembered for the full `max_ttl`.
	pub fn revoke(&self, raw_token: &str) -> Duration {
		self.revoke_until(TokenFingerprint::of(raw_token), token::peek_expiry(raw_token))
	}

	/// Revoke a token fingerprint until `expires_at` (capped); returns the TTL applied.
	pub fn revoke_until(
		&self,
		fingerprint: TokenFingerprint,
		expires_at: Option<DateTime<Utc>>,
	) -> Duration {
		let now = self.entries.clock().now();
		let ttl = match expires_at {
			Some(deadline) => clock::remaining(now, deadline).unwrap_or_default().min(self.max_ttl),
			None => self.max_ttl,
		};

		if !ttl.is_zero() {
			self.entries.insert(fingerprint, now, ttl);

			tracing::info!(token = %fingerprint, ttl = ?ttl, "token revoked");
		}

		ttl
	}

	/// Whether the token is currently revoked.
	pub fn is_revoked(&self, fingerprint: &TokenFingerprint) -> bool {
		self.entries.contains(fingerprint)
	}

	/// Instant the revocation was recorded, if still active.
	pub fn revoked_at(&self, fingerprint: &TokenFingerprint) -> Option<DateTime<Utc>> {
		self.entries.get(fingerprint)
	}

	/// Drop revocations whose TTL elapsed.
	pub fn purge_expired(&self) -> usize {
		self.entries.purge_expired()
	}

	/// Number of remembered revocations.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether no revocations are remembered.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}
