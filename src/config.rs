//! Configuration for the key cache, the authentication gate, and the client session coordinator.
//!
//! Every struct deserialises with `serde`, has sensible defaults, and exposes `validate()` so hosts
//! can fail fast at startup instead of at the first request.

// std
use std::{cell::RefCell, mem};
// crates.io
use jsonwebtoken::Algorithm;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, security};

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Default lifetime of a fetched signing key when the endpoint sends no cache headers.
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(60 * 60);
/// Lower clamp applied to key endpoint cache lifetimes.
pub const MIN_KEY_TTL_FLOOR: Duration = Duration::from_secs(30);
/// Default upper clamp applied to key endpoint cache lifetimes.
pub const DEFAULT_MAX_KEY_TTL: Duration = Duration::from_secs(60 * 60 * 24);
/// Default window during which an expired key may still be served if the endpoint is down.
pub const DEFAULT_STALE_WHILE_ERROR: Duration = Duration::from_secs(60);
/// Default cooldown before an unknown `kid` triggers another key fetch.
pub const DEFAULT_UNKNOWN_KID_COOLDOWN: Duration = Duration::from_secs(30);
/// Default size guard for key documents (1 MiB).
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 1_048_576;
/// Default skew subtracted from `exp` before caching a successful validation.
pub const DEFAULT_SKEW: Duration = Duration::from_secs(30);
/// Default lifetime of a cached validation failure.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(30);
/// Default cap on how long a revocation is remembered.
pub const DEFAULT_MAX_REVOCATION_TTL: Duration = Duration::from_secs(60 * 60);
/// Default interval between client-side expiry checks.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(10);
/// Default remaining lifetime below which the client refreshes.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(60);
/// Default upper bound on a single refresh flight, retries included.
pub const DEFAULT_REFRESH_CEILING: Duration = Duration::from_secs(60);
/// Maximum redirect depth for upstream calls.
pub const MAX_REDIRECTS: u8 = 10;

/// Supported jitter strategies for retry policies.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// Deterministic backoff schedule.
	None,
	/// Randomise the delay within the upper fifth of the computed backoff.
	#[default]
	Full,
	/// Decorrelated jitter bounded by three times the previous delay.
	Decorrelated,
}

/// Bounded exponential backoff used for refresh-token exchanges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Retries performed after the initial attempt.
	pub max_retries: u32,
	/// Timeout applied to each attempt.
	pub attempt_timeout: Duration,
	/// Delay before the first retry.
	pub initial_backoff: Duration,
	/// Upper bound on backoff growth.
	pub max_backoff: Duration,
	/// Overall deadline for the whole sequence.
	pub deadline: Duration,
	/// Randomisation strategy.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// Policy performing exactly one attempt.
	pub fn single_attempt(attempt_timeout: Duration) -> Self {
		Self {
			max_retries: 0,
			attempt_timeout,
			initial_backoff: Duration::from_millis(100),
			max_backoff: Duration::from_millis(100),
			deadline: attempt_timeout,
			jitter: JitterStrategy::None,
		}
	}

	/// Validate retry invariants.
	pub fn validate(&self) -> Result<()> {
		if self.attempt_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "retry_policy.attempt_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.initial_backoff.is_zero() {
			return Err(Error::Validation {
				field: "retry_policy.initial_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.initial_backoff {
			return Err(Error::Validation {
				field: "retry_policy.max_backoff",
				reason: "Must be greater than or equal to initial_backoff.".into(),
			});
		}
		if self.deadline < self.attempt_timeout {
			return Err(Error::Validation {
				field: "retry_policy.deadline",
				reason: "Must be greater than or equal to attempt_timeout.".into(),
			});
		}

		Ok(())
	}

	/// Backoff before retry number `attempt` (zero-based), jitter applied.
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.min(32) as i32;
		let bounded = self
			.initial_backoff
			.mul_f64(2f64.powi(exponent))
			.min(self.max_backoff)
			.max(self.initial_backoff);

		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Full =>
				random_within(bounded.mul_f64(0.8).max(self.initial_backoff), bounded),
			JitterStrategy::Decorrelated => {
				let previous = if attempt == 0 { self.initial_backoff } else { bounded };
				let ceiling = self.max_backoff.min(previous.mul_f64(3.0));

				random_within(self.initial_backoff, ceiling.max(self.initial_backoff))
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 2,
			attempt_timeout: Duration::from_secs(10),
			initial_backoff: Duration::from_millis(500),
			max_backoff: Duration::from_secs(4),
			deadline: Duration::from_secs(45),
			jitter: JitterStrategy::Full,
		}
	}
}

/// How signing keys are fetched from the identity provider and how long they are kept.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyCacheConfig {
	/// Key-publishing endpoint (a JWKS document).
	pub jwks_url: Url,
	/// Whether the endpoint must use HTTPS.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Optional allowlist of hosts permitted for the endpoint and its redirects.
	#[serde(default, deserialize_with = "crate::security::deserialize_allowed_domains")]
	pub allowed_domains: Vec<String>,
	/// Key lifetime when the endpoint sends no usable `Cache-Control`.
	#[serde(default = "default_key_ttl")]
	pub default_ttl: Duration,
	/// Lower clamp for endpoint-provided lifetimes.
	#[serde(default = "default_min_key_ttl")]
	pub min_ttl: Duration,
	/// Upper clamp for endpoint-provided lifetimes.
	#[serde(default = "default_max_key_ttl")]
	pub max_ttl: Duration,
	/// Grace window for serving an expired key while the endpoint is unreachable.
	#[serde(default = "default_stale_while_error")]
	pub stale_while_error: Duration,
	/// Minimum spacing between fetches caused by the same unknown `kid`.
	#[serde(default = "default_unknown_kid_cooldown")]
	pub unknown_kid_cooldown: Duration,
	/// Maximum accepted key document size in bytes.
	#[serde(default = "default_max_response_bytes")]
	pub max_response_bytes: u64,
	/// Timeout for a single fetch.
	#[serde(default = "default_fetch_timeout")]
	pub fetch_timeout: Duration,
	/// Maximum number of keys retained from one document.
	#[serde(default = "default_max_keys")]
	pub max_keys: usize,
	/// Maximum redirects followed during a fetch.
	#[serde(default = "default_max_redirects")]
	pub max_redirects: u8,
}
impl KeyCacheConfig {
	/// Configuration for the given endpoint with default cache settings.
	pub fn new(jwks_url: impl AsRef<str>) -> Result<Self> {
		Ok(Self {
			jwks_url: Url::parse(jwks_url.as_ref())?,
			require_https: true,
			allowed_domains: Vec::new(),
			default_ttl: DEFAULT_KEY_TTL,
			min_ttl: MIN_KEY_TTL_FLOOR,
			max_ttl: DEFAULT_MAX_KEY_TTL,
			stale_while_error: DEFAULT_STALE_WHILE_ERROR,
			unknown_kid_cooldown: DEFAULT_UNKNOWN_KID_COOLDOWN,
			max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
			fetch_timeout: default_fetch_timeout(),
			max_keys: default_max_keys(),
			max_redirects: default_max_redirects(),
		})
	}

	/// Set the HTTPS requirement.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Replace the host allowlist; entries are canonicalised.
	pub fn with_allowed_domains<I, S>(mut self, domains: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.allowed_domains =
			security::normalize_allowlist(domains.into_iter().map(Into::into).collect());

		self
	}

	/// Set the default key lifetime.
	pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
		self.default_ttl = ttl;

		self
	}

	/// Set the stale-while-error grace window.
	pub fn with_stale_while_error(mut self, window: Duration) -> Self {
		self.stale_while_error = window;

		self
	}

	/// Set the unknown-`kid` refetch cooldown.
	pub fn with_unknown_kid_cooldown(mut self, cooldown: Duration) -> Self {
		self.unknown_kid_cooldown = cooldown;

		self
	}

	/// Canonicalise the allowlist in place.
	pub fn normalize_allowed_domains(&mut self) {
		let domains = mem::take(&mut self.allowed_domains);

		self.allowed_domains = security::normalize_allowlist(domains);
	}

	/// Clamp an endpoint-provided lifetime into `[min_ttl, max_ttl]`.
	pub fn clamp_ttl(&self, ttl: Duration) -> Duration {
		ttl.clamp(self.min_ttl, self.max_ttl)
	}

	/// Validate the configuration.
	pub fn validate(&self) -> Result<()> {
		security::check_upstream(&self.jwks_url, self.require_https, &self.allowed_domains)
			.map_err(|err| Error::Validation { field: "jwks_url", reason: err.to_string() })?;

		if self.min_ttl < MIN_KEY_TTL_FLOOR {
			return Err(Error::Validation {
				field: "min_ttl",
				reason: format!("Must be at least {MIN_KEY_TTL_FLOOR:?}."),
			});
		}
		if self.max_ttl < self.min_ttl {
			return Err(Error::Validation {
				field: "max_ttl",
				reason: "Must be greater than or equal to min_ttl.".into(),
			});
		}
		if self.default_ttl < self.min_ttl || self.default_ttl > self.max_ttl {
			return Err(Error::Validation {
				field: "default_ttl",
				reason: "Must lie within [min_ttl, max_ttl].".into(),
			});
		}
		if self.unknown_kid_cooldown > self.min_ttl {
			return Err(Error::Validation {
				field: "unknown_kid_cooldown",
				reason: "Must not exceed min_ttl, or expired keys could wait out the cooldown."
					.into(),
			});
		}
		if self.max_response_bytes == 0 {
			return Err(Error::Validation {
				field: "max_response_bytes",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.fetch_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "fetch_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.max_keys == 0 {
			return Err(Error::Validation {
				field: "max_keys",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_redirects > MAX_REDIRECTS {
			return Err(Error::Validation {
				field: "max_redirects",
				reason: format!("Must be less than or equal to {MAX_REDIRECTS}."),
			});
		}

		Ok(())
	}
}

/// Settings for the inbound authentication gate and its caches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateConfig {
	/// Margin subtracted from `exp` before caching a successful validation.
	#[serde(default = "default_skew")]
	pub skew: Duration,
	/// Lifetime of a cached validation failure.
	#[serde(default = "default_negative_ttl")]
	pub negative_ttl: Duration,
	/// Maximum number of cached validation outcomes.
	#[serde(default = "default_validation_capacity")]
	pub validation_capacity: usize,
	/// Maximum number of remembered revocations.
	#[serde(default = "default_revocation_capacity")]
	pub revocation_capacity: usize,
	/// Cap on how long a revocation is remembered.
	#[serde(default = "default_max_revocation_ttl")]
	pub max_revocation_ttl: Duration,
	/// Accepted signature algorithms; asymmetric only.
	#[serde(default = "default_algorithms")]
	pub algorithms: Vec<Algorithm>,
	/// Required `iss` claim, when set.
	#[serde(default)]
	pub issuer: Option<String>,
	/// Accepted `aud` values, when set.
	#[serde(default)]
	pub audience: Option<Vec<String>>,
}
impl GateConfig {
	/// Require the given issuer.
	pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
		self.issuer = Some(issuer.into());

		self
	}

	/// Require one of the given audiences.
	pub fn with_audience<I, S>(mut self, audience: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.audience = Some(audience.into_iter().map(Into::into).collect());

		self
	}

	/// Restrict accepted algorithms.
	pub fn with_algorithms(mut self, algorithms: impl Into<Vec<Algorithm>>) -> Self {
		self.algorithms = algorithms.into();

		self
	}

	/// Validate the configuration.
	pub fn validate(&self) -> Result<()> {
		if self.algorithms.is_empty() {
			return Err(Error::Validation {
				field: "algorithms",
				reason: "At least one algorithm must be accepted.".into(),
			});
		}
		if let Some(symmetric) = self.algorithms.iter().find(|alg| is_symmetric(**alg)) {
			return Err(Error::Validation {
				field: "algorithms",
				reason: format!("Symmetric algorithm {symmetric:?} cannot verify provider tokens."),
			});
		}
		if self.validation_capacity == 0 || self.revocation_capacity == 0 {
			return Err(Error::Validation {
				field: "capacity",
				reason: "Cache capacities must be greater than zero.".into(),
			});
		}
		if self.max_revocation_ttl.is_zero() {
			return Err(Error::Validation {
				field: "max_revocation_ttl",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.audience.as_ref().is_some_and(Vec::is_empty) {
			return Err(Error::Validation {
				field: "audience",
				reason: "Use None instead of an empty audience list.".into(),
			});
		}

		Ok(())
	}
}
impl Default for GateConfig {
	fn default() -> Self {
		Self {
			skew: DEFAULT_SKEW,
			negative_ttl: DEFAULT_NEGATIVE_TTL,
			validation_capacity: default_validation_capacity(),
			revocation_capacity: default_revocation_capacity(),
			max_revocation_ttl: DEFAULT_MAX_REVOCATION_TTL,
			algorithms: default_algorithms(),
			issuer: None,
			audience: None,
		}
	}
}

/// Settings for the client-side session coordinator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
	/// Identity provider token endpoint.
	pub token_endpoint: Url,
	/// OAuth client identifier sent with refresh grants.
	pub client_id: String,
	/// Optional client secret for confidential clients.
	#[serde(default, skip_serializing)]
	pub client_secret: Option<String>,
	/// Where the user is sent when re-authentication is required.
	pub login_url: Url,
	/// Whether the token endpoint must use HTTPS.
	#[serde(default = "default_true")]
	pub require_https: bool,
	/// Interval between background expiry checks.
	#[serde(default = "default_check_interval")]
	pub check_interval: Duration,
	/// Remaining lifetime below which a refresh starts.
	#[serde(default = "default_refresh_buffer")]
	pub refresh_buffer: Duration,
	/// Ceiling on one refresh flight, retries included.
	#[serde(default = "default_refresh_ceiling")]
	pub refresh_ceiling: Duration,
	/// Retry policy for transient exchange failures.
	#[serde(default)]
	pub retry_policy: RetryPolicy,
}
impl SessionConfig {
	/// Configuration with default timings.
	pub fn new(
		token_endpoint: impl AsRef<str>,
		client_id: impl Into<String>,
		login_url: impl AsRef<str>,
	) -> Result<Self> {
		Ok(Self {
			token_endpoint: Url::parse(token_endpoint.as_ref())?,
			client_id: client_id.into(),
			client_secret: None,
			login_url: Url::parse(login_url.as_ref())?,
			require_https: true,
			check_interval: DEFAULT_CHECK_INTERVAL,
			refresh_buffer: DEFAULT_REFRESH_BUFFER,
			refresh_ceiling: DEFAULT_REFRESH_CEILING,
			retry_policy: RetryPolicy::default(),
		})
	}

	/// Set the HTTPS requirement.
	pub fn with_require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Set the client secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Replace the retry policy.
	pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = policy;

		self
	}

	/// Set the refresh buffer.
	pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
		self.refresh_buffer = buffer;

		self
	}

	/// Set the background check interval.
	pub fn with_check_interval(mut self, interval: Duration) -> Self {
		self.check_interval = interval;

		self
	}

	/// Validate the configuration.
	pub fn validate(&self) -> Result<()> {
		if self.require_https {
			security::enforce_https(&self.token_endpoint).map_err(|err| Error::Validation {
				field: "token_endpoint",
				reason: err.to_string(),
			})?;
		}
		if self.client_id.trim().is_empty() {
			return Err(Error::Validation {
				field: "client_id",
				reason: "Must not be empty.".into(),
			});
		}
		if self.check_interval < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "check_interval",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.refresh_buffer <= self.check_interval {
			return Err(Error::Validation {
				field: "refresh_buffer",
				reason: "Must exceed check_interval so a check always lands inside the buffer."
					.into(),
			});
		}
		if self.refresh_ceiling < self.retry_policy.attempt_timeout {
			return Err(Error::Validation {
				field: "refresh_ceiling",
				reason: "Must be at least one attempt_timeout.".into(),
			});
		}

		self.retry_policy.validate()
	}
}

/// Whether an algorithm is an HMAC variant.
pub fn is_symmetric(algorithm: Algorithm) -> bool {
	matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}

	SMALL_RNG.with(|cell| {
		let span = (max - min).as_nanos().min(u64::MAX as u128) as u64;
		let jitter = cell.borrow_mut().random_range(0..=span);

		min + Duration::from_nanos(jitter)
	})
}

fn default_true() -> bool {
	true
}

fn default_key_ttl() -> Duration {
	DEFAULT_KEY_TTL
}

fn default_min_key_ttl() -> Duration {
	MIN_KEY_TTL_FLOOR
}

fn default_max_key_ttl() -> Duration {
	DEFAULT_MAX_KEY_TTL
}

fn default_stale_while_error() -> Duration {
	DEFAULT_STALE_WHILE_ERROR
}

fn default_unknown_kid_cooldown() -> Duration {
	DEFAULT_UNKNOWN_KID_COOLDOWN
}

fn default_max_response_bytes() -> u64 {
	DEFAULT_MAX_RESPONSE_BYTES
}

fn default_fetch_timeout() -> Duration {
	Duration::from_secs(5)
}

fn default_max_keys() -> usize {
	32
}

fn default_max_redirects() -> u8 {
	3
}

fn default_skew() -> Duration {
	DEFAULT_SKEW
}

fn default_negative_ttl() -> Duration {
	DEFAULT_NEGATIVE_TTL
}

fn default_validation_capacity() -> usize {
	10_000
}

fn default_revocation_capacity() -> usize {
	10_000
}

fn default_max_revocation_ttl() -> Duration {
	DEFAULT_MAX_REVOCATION_TTL
}

fn default_algorithms() -> Vec<Algorithm> {
	vec![
		Algorithm::RS256,
		Algorithm::RS384,
		Algorithm::RS512,
		Algorithm::PS256,
		Algorithm::PS384,
		Algorithm::PS512,
		Algorithm::ES256,
		Algorithm::ES384,
		Algorithm::EdDSA,
	]
}

fn default_check_interval() -> Duration {
	DEFAULT_CHECK_INTERVAL
}

fn default_refresh_buffer() -> Duration {
	DEFAULT_REFRESH_BUFFER
}

fn default_refresh_ceiling() -> Duration {
	DEFAULT_REFRESH_CEILING
}
