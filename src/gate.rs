//! Request admission: revocation, cached outcomes, verification, and principal upsert.

// crates.io
use serde::Serialize;
// self
use crate::{
	_prelude::*,
	cache::{
		revocation::RevocationList,
		validation::{ValidationCache, ValidationOutcome},
	},
	clock::SharedClock,
	config::GateConfig,
	failure::AuthFailure,
	keys::KeyCache,
	metrics::{self, GateMetrics},
	principal::{Principal, PrincipalStore},
	token::{self, TokenClaims, TokenFingerprint},
	verifier::TokenVerifier,
};

/// Where an admitted request's claims came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionSource {
	/// A live entry in the validation cache.
	Cache,
	/// A full signature verification.
	Verified,
}
impl AdmissionSource {
	/// Label used in logs and metrics.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Cache => "cache",
			Self::Verified => "verified",
		}
	}
}

/// Transition taken while deciding one request, emitted at debug level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateStep {
	/// No usable bearer token was presented.
	NoToken,
	/// The token is on the revocation list.
	Revoked,
	/// A cached outcome answered the request.
	CacheHit,
	/// No cached outcome; the verifier runs.
	CacheMiss,
	/// The verifier accepted the token.
	Verified,
	/// The request was admitted with a principal.
	Admitted,
	/// The request was rejected.
	Rejected,
}

/// Successful admission attached to the request.
#[derive(Clone, Debug)]
pub struct Admission {
	/// Principal upserted for this request.
	pub principal: Arc<Principal>,
	/// Verified claims.
	pub claims: Arc<TokenClaims>,
	/// Fingerprint of the presented token.
	pub fingerprint: TokenFingerprint,
	/// Whether the outcome was cached or freshly verified.
	pub source: AdmissionSource,
}

#[derive(Debug)]
struct Rejected {
	failure: AuthFailure,
	subject: Option<String>,
}
impl From<AuthFailure> for Rejected {
	fn from(failure: AuthFailure) -> Self {
		Self { failure, subject: None }
	}
}

/// Framework-neutral authentication gate.
///
/// The revocation list is always consulted before the validation cache, so a revoked token is
/// rejected even while a `Valid` outcome for it is still cached. Rejected requests never touch
/// the principal store.
#[derive(Debug)]
pub struct AuthGate {
	revocations: RevocationList,
	validations: ValidationCache,
	verifier: TokenVerifier,
	principals: Arc<dyn PrincipalStore>,
	clock: SharedClock,
	metrics: Arc<GateMetrics>,
}
impl AuthGate {
	/// Build a gate over `keys` and `principals`.
	pub fn new(
		config: &GateConfig,
		keys: Arc<KeyCache>,
		principals: Arc<dyn PrincipalStore>,
		clock: SharedClock,
	) -> Result<Self> {
		config.validate()?;

		Ok(Self {
			revocations: RevocationList::new(
				config.revocation_capacity,
				config.max_revocation_ttl,
				clock.clone(),
			),
			validations: ValidationCache::new(
				config.validation_capacity,
				config.skew,
				config.negative_ttl,
				clock.clone(),
			),
			verifier: TokenVerifier::new(keys, config, clock.clone()),
			principals,
			clock,
			metrics: GateMetrics::new(),
		})
	}

	/// Clock shared with the caches.
	pub fn clock(&self) -> &SharedClock {
		&self.clock
	}

	/// Per-gate telemetry accumulator.
	pub fn metrics(&self) -> Arc<GateMetrics> {
		self.metrics.clone()
	}

	/// Underlying verifier.
	pub fn verifier(&self) -> &TokenVerifier {
		&self.verifier
	}

	/// Validation outcome cache.
	pub fn validations(&self) -> &ValidationCache {
		&self.validations
	}

	/// Revocation list.
	pub fn revocations(&self) -> &RevocationList {
		&self.revocations
	}

	/// Principal store.
	pub fn principals(&self) -> &Arc<dyn PrincipalStore> {
		&self.principals
	}

	/// Decide a request from its `Authorization` header value.
	#[tracing::instrument(skip(self, authorization))]
	pub async fn authenticate(
		&self,
		authorization: Option<&str>,
		path: &str,
	) -> std::result::Result<Admission, AuthFailure> {
		self.metrics.record_request();

		let raw = match token::extract_bearer(authorization) {
			Ok(raw) => raw,
			Err(failure) => {
				trace_step(None, GateStep::NoToken);

				return Err(self.reject(failure, path, None, None));
			},
		};
		let fingerprint = TokenFingerprint::of(raw);

		match self.admit(raw, fingerprint).await {
			Ok(admission) => {
				trace_step(Some(&fingerprint), GateStep::Admitted);
				metrics::record_admission(admission.source.as_str());

				self.metrics.record_admitted();

				Ok(admission)
			},
			Err(Rejected { failure, subject }) =>
				Err(self.reject(failure, path, Some(&fingerprint), subject.as_deref())),
		}
	}

	/// Revoke a raw token and drop its cached outcome; returns how long it stays revoked.
	pub fn revoke(&self, raw_token: &str) -> Duration {
		let ttl = self.revocations.revoke(raw_token);

		self.validations.invalidate(&TokenFingerprint::of(raw_token));
		self.metrics.record_revocation();
		metrics::record_revocation();

		ttl
	}

	/// Drop expired entries from both caches; returns how many were removed.
	pub fn purge_expired(&self) -> usize {
		self.revocations.purge_expired() + self.validations.purge_expired()
	}

	async fn admit(
		&self,
		raw: &str,
		fingerprint: TokenFingerprint,
	) -> std::result::Result<Admission, Rejected> {
		if self.revocations.is_revoked(&fingerprint) {
			trace_step(Some(&fingerprint), GateStep::Revoked);

			return Err(AuthFailure::TokenRevoked.into());
		}

		let (claims, source) = match self.validations.get(&fingerprint) {
			Some(ValidationOutcome::Valid(claims)) => {
				trace_step(Some(&fingerprint), GateStep::CacheHit);

				self.metrics.record_cache_hit();

				(claims, AdmissionSource::Cache)
			},
			Some(ValidationOutcome::Invalid(failure)) => {
				trace_step(Some(&fingerprint), GateStep::CacheHit);

				self.metrics.record_cache_hit();

				return Err(failure.into());
			},
			None => {
				trace_step(Some(&fingerprint), GateStep::CacheMiss);

				self.metrics.record_verification();

				match self.verifier.verify(raw).await {
					Ok(claims) => {
						let claims = Arc::new(claims);

						trace_step(Some(&fingerprint), GateStep::Verified);

						self.validations.record_success(fingerprint, claims.clone());

						(claims, AdmissionSource::Verified)
					},
					Err(failure) => {
						self.validations.record_failure(fingerprint, failure.clone());

						return Err(failure.into());
					},
				}
			},
		};

		// Logout may have landed while the verifier awaited a key fetch.
		if self.revocations.is_revoked(&fingerprint) {
			self.validations.invalidate(&fingerprint);

			return Err(Rejected {
				failure: AuthFailure::TokenRevoked,
				subject: Some(claims.sub.clone()),
			});
		}

		let principal = match self.principals.upsert(&claims, self.clock.now()).await {
			Ok(principal) => principal,
			Err(Error::PrincipalNotFound { subject }) =>
				return Err(Rejected {
					failure: AuthFailure::PrincipalNotFound { subject: subject.clone() },
					subject: Some(subject),
				}),
			Err(err) =>
				return Err(Rejected {
					failure: AuthFailure::PrincipalStoreUnavailable { reason: err.to_string() },
					subject: Some(claims.sub.clone()),
				}),
		};

		Ok(Admission { principal: Arc::new(principal), claims, fingerprint, source })
	}

	fn reject(
		&self,
		failure: AuthFailure,
		path: &str,
		fingerprint: Option<&TokenFingerprint>,
		subject: Option<&str>,
	) -> AuthFailure {
		let token = fingerprint.map(TokenFingerprint::short);
		let token = token.as_deref();
		let subject = subject.unwrap_or("-");

		trace_step(fingerprint, GateStep::Rejected);

		if failure.is_transient() {
			tracing::error!(subject, path, kind = failure.code(), token, "request rejected: {failure}");
		} else {
			tracing::warn!(subject, path, kind = failure.code(), token, "request rejected: {failure}");
		}

		metrics::record_rejection(failure.code());

		self.metrics.record_rejected();

		failure
	}
}

fn trace_step(fingerprint: Option<&TokenFingerprint>, step: GateStep) {
	let token = fingerprint.map(TokenFingerprint::short);

	tracing::debug!(token = token.as_deref(), ?step, "gate transition");
}
