//! Token claims, bearer extraction, and unverified payload inspection.

// std
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
// crates.io
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, failure::AuthFailure};

/// Security attributes carried by a token and forwarded to the policy engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityAttributes {
	/// Clearance level, e.g. `SECRET`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub clearance: Option<String>,
	/// Country of affiliation (ISO 3166 alpha-3).
	#[serde(
		default,
		rename = "countryOfAffiliation",
		alias = "country",
		skip_serializing_if = "Option::is_none"
	)]
	pub country: Option<String>,
	/// Handling caveats.
	#[serde(default)]
	pub caveats: Vec<String>,
	/// Communities of interest.
	#[serde(default, rename = "acpCOI", alias = "coi")]
	pub communities_of_interest: Vec<String>,
	/// Application roles.
	#[serde(default)]
	pub roles: Vec<String>,
}

/// Claims embedded in a verified access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
	/// Subject identifier.
	pub sub: String,
	/// Username presented to humans.
	#[serde(default, rename = "preferred_username", alias = "username")]
	pub username: String,
	/// Issued-at, seconds since the Unix epoch.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iat: Option<i64>,
	/// Expiry, seconds since the Unix epoch.
	pub exp: i64,
	/// Issuer.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iss: Option<String>,
	/// Contact email.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	/// Display name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Organization the subject belongs to.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub organization: Option<String>,
	/// Security attributes.
	#[serde(flatten)]
	pub attributes: SecurityAttributes,
}
impl TokenClaims {
	/// Expiry as a UTC timestamp.
	pub fn expires_at(&self) -> DateTime<Utc> {
		DateTime::from_timestamp(self.exp, 0).unwrap_or_default()
	}

	/// Seconds between `now` and `exp`; negative once expired.
	pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
		self.exp - now.timestamp()
	}
}

/// SHA-256 digest of a raw token, used as the cache key for that token.
///
/// Caches key on the digest so raw bearer strings never sit in long-lived memory or logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenFingerprint([u8; 32]);
impl TokenFingerprint {
	/// Fingerprint a raw token string.
	pub fn of(token: &str) -> Self {
		let digest = Sha256::digest(token.as_bytes());
		let mut bytes = [0u8; 32];

		bytes.copy_from_slice(&digest);

		Self(bytes)
	}

	/// Short, log-safe prefix of the fingerprint.
	pub fn short(&self) -> String {
		BASE64_URL_SAFE_NO_PAD.encode(&self.0[..9])
	}
}
impl Debug for TokenFingerprint {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		write!(f, "TokenFingerprint({})", self.short())
	}
}
impl Display for TokenFingerprint {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.write_str(&self.short())
	}
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
///
/// A missing header is [`AuthFailure::MissingToken`]; any other scheme, an empty token, or
/// embedded whitespace is [`AuthFailure::MalformedToken`].
pub fn extract_bearer(header: Option<&str>) -> std::result::Result<&str, AuthFailure> {
	let value = header.ok_or(AuthFailure::MissingToken)?.trim();
	let (scheme, token) = value
		.split_once(' ')
		.ok_or_else(|| AuthFailure::malformed("Authorization header must use the Bearer scheme."))?;

	if !scheme.eq_ignore_ascii_case("bearer") {
		return Err(AuthFailure::malformed("Authorization header must use the Bearer scheme."));
	}

	let token = token.trim();

	if token.is_empty() || token.contains(char::is_whitespace) {
		return Err(AuthFailure::malformed("Bearer token is empty or contains whitespace."));
	}

	Ok(token)
}

/// Registered time claims read from a token without verifying it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct UnverifiedTimes {
	/// Expiry, seconds since the Unix epoch.
	#[serde(default)]
	pub exp: Option<i64>,
	/// Issued-at, seconds since the Unix epoch.
	#[serde(default)]
	pub iat: Option<i64>,
}

/// Decode the payload segment of a compact JWS without checking its signature.
///
/// Only for decisions that are safe on untrusted input: rejecting expired tokens early,
/// advisory headers, and client-side refresh scheduling.
pub fn peek_times(token: &str) -> std::result::Result<UnverifiedTimes, AuthFailure> {
	let mut segments = token.split('.');
	let (Some(_header), Some(payload), Some(_signature), None) =
		(segments.next(), segments.next(), segments.next(), segments.next())
	else {
		return Err(AuthFailure::malformed("Token must have three dot-separated segments."));
	};
	let bytes = BASE64_URL_SAFE_NO_PAD
		.decode(payload.trim_end_matches('='))
		.map_err(|err| AuthFailure::malformed(format!("Payload is not base64url: {err}.")))?;

	serde_json::from_slice(&bytes)
		.map_err(|err| AuthFailure::malformed(format!("Payload is not a JSON object: {err}.")))
}

/// Expiry instant of a token, read without verification.
pub fn peek_expiry(token: &str) -> Option<DateTime<Utc>> {
	peek_times(token).ok()?.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
}
