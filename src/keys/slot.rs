//! Per-`kid` cache slots.

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	sync::{PoisonError, RwLock},
};
// crates.io
use jsonwebtoken::{
	Algorithm, DecodingKey,
	jwk::{Jwk, PublicKeyUse},
};
use tokio::sync::{Mutex, MutexGuard};
// self
use crate::_prelude::*;

/// Public verification key published under a `kid`.
#[derive(Clone)]
pub struct SigningKey {
	/// Key identifier.
	pub kid: String,
	/// Algorithm the key is declared for, if the provider declared one.
	pub algorithm: Option<String>,
	/// Verification key material.
	pub decoding_key: DecodingKey,
	/// When the key document carrying this key was fetched.
	pub fetched_at: DateTime<Utc>,
	/// When this key must be fetched again.
	pub expires_at: DateTime<Utc>,
}
impl SigningKey {
	/// Build a key from a JWK entry.
	///
	/// Entries without a `kid` or marked for encryption are skipped (`Ok(None)`).
	pub fn from_jwk(jwk: &Jwk, fetched_at: DateTime<Utc>, ttl: Duration) -> Result<Option<Self>> {
		let Some(kid) = jwk.common.key_id.clone() else {
			return Ok(None);
		};

		if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
			return Ok(None);
		}

		let decoding_key = DecodingKey::from_jwk(jwk)?;
		let algorithm = jwk.common.key_algorithm.as_ref().and_then(serde_name);
		let expires_at = TimeDelta::from_std(ttl)
			.ok()
			.and_then(|ttl| fetched_at.checked_add_signed(ttl))
			.unwrap_or(DateTime::<Utc>::MAX_UTC);

		Ok(Some(Self { kid, algorithm, decoding_key, fetched_at, expires_at }))
	}

	/// Whether the key's cache lifetime has elapsed.
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		now >= self.expires_at
	}

	/// Whether an expired key may still be served while the endpoint is unreachable.
	pub fn within_grace(&self, now: DateTime<Utc>, grace: Duration) -> bool {
		TimeDelta::from_std(grace)
			.ok()
			.and_then(|grace| self.expires_at.checked_add_signed(grace))
			.is_some_and(|deadline| now < deadline)
	}

	/// Whether the key may verify a token signed with `algorithm`.
	///
	/// A key that declares no algorithm accepts any algorithm the verifier allows.
	pub fn accepts(&self, algorithm: Algorithm) -> bool {
		self.algorithm
			.as_deref()
			.is_none_or(|declared| serde_name(&algorithm).as_deref() == Some(declared))
	}
}
impl Debug for SigningKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("SigningKey")
			.field("kid", &self.kid)
			.field("algorithm", &self.algorithm)
			.field("fetched_at", &self.fetched_at)
			.field("expires_at", &self.expires_at)
			.finish_non_exhaustive()
	}
}

/// Cache slot for one `kid`.
///
/// The key sits behind a short synchronous lock that is never held across an await; the flight
/// mutex serialises fetches triggered by this `kid` only.
#[derive(Debug, Default)]
pub struct KeySlot {
	key: RwLock<Option<Arc<SigningKey>>>,
	flight: Mutex<()>,
}
impl KeySlot {
	/// Current key, fresh or not.
	pub fn current(&self) -> Option<Arc<SigningKey>> {
		self.key.read().unwrap_or_else(PoisonError::into_inner).clone()
	}

	/// Current key if it has not expired.
	pub fn fresh(&self, now: DateTime<Utc>) -> Option<Arc<SigningKey>> {
		self.current().filter(|key| !key.is_expired(now))
	}

	/// Install a newly fetched key.
	pub fn replace(&self, key: Arc<SigningKey>) {
		*self.key.write().unwrap_or_else(PoisonError::into_inner) = Some(key);
	}

	/// Whether the slot holds no key.
	pub fn is_empty(&self) -> bool {
		self.key.read().unwrap_or_else(PoisonError::into_inner).is_none()
	}

	/// Wait for this slot's single-flight guard.
	pub async fn begin_flight(&self) -> MutexGuard<'_, ()> {
		self.flight.lock().await
	}

	/// Whether a fetch for this slot is in progress.
	pub fn in_flight(&self) -> bool {
		self.flight.try_lock().is_err()
	}
}

fn serde_name<T>(value: &T) -> Option<String>
where
	T: serde::Serialize,
{
	match serde_json::to_value(value).ok()? {
		serde_json::Value::String(name) => Some(name),
		_ => None,
	}
}
