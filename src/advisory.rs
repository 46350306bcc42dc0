//! Expiry advisories attached to outbound responses.
//!
//! The advisory reads `exp` from the presented bearer token without verifying it; it informs the
//! client and never affects admission.

// crates.io
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
// self
use crate::{_prelude::*, token};

/// Seconds until the token expires, clamped at zero.
pub const EXPIRES_IN: HeaderName = HeaderName::from_static("x-token-expires-in");
/// Present with `true` when the token is inside a refresh tier.
pub const EXPIRING: HeaderName = HeaderName::from_static("x-token-expiring");
/// `critical`, `high`, or `medium`.
pub const REFRESH_PRIORITY: HeaderName = HeaderName::from_static("x-token-refresh-priority");
/// Present with `true` when the client should refresh before its next call.
pub const REFRESH_NOW: HeaderName = HeaderName::from_static("x-token-refresh-now");

const CRITICAL_BELOW: i64 = 30;
const HIGH_BELOW: i64 = 60;
const MEDIUM_BELOW: i64 = 300;

/// Urgency tier derived from seconds remaining.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPriority {
	/// Under 30 seconds.
	Critical,
	/// Under 60 seconds.
	High,
	/// Under 5 minutes.
	Medium,
	/// Anything longer.
	Fresh,
}
impl RefreshPriority {
	/// Tier for the given remaining lifetime.
	pub fn for_remaining(seconds_remaining: i64) -> Self {
		match seconds_remaining {
			s if s < CRITICAL_BELOW => Self::Critical,
			s if s < HIGH_BELOW => Self::High,
			s if s < MEDIUM_BELOW => Self::Medium,
			_ => Self::Fresh,
		}
	}

	/// Header value for this tier.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Critical => "critical",
			Self::High => "high",
			Self::Medium => "medium",
			Self::Fresh => "fresh",
		}
	}

	/// Whether the remaining time is below the client's refresh buffer.
	pub fn refresh_now(self) -> bool {
		matches!(self, Self::Critical | Self::High)
	}
}

/// Advisory computed for one response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ExpiryAdvisory {
	/// `exp - now`; negative once expired.
	pub seconds_remaining: i64,
	/// Urgency tier.
	pub priority: RefreshPriority,
}
impl ExpiryAdvisory {
	/// Advisory for a token expiring at `exp` (Unix seconds).
	pub fn at(exp: i64, now: DateTime<Utc>) -> Self {
		let seconds_remaining = exp - now.timestamp();

		Self { seconds_remaining, priority: RefreshPriority::for_remaining(seconds_remaining) }
	}

	/// Advisory for a raw token; `None` when its payload has no readable `exp`.
	pub fn for_token(raw_token: &str, now: DateTime<Utc>) -> Option<Self> {
		let exp = token::peek_times(raw_token).ok()?.exp?;

		Some(Self::at(exp, now))
	}

	/// Write the advisory headers.
	pub fn apply(&self, headers: &mut HeaderMap) {
		headers.insert(EXPIRES_IN, HeaderValue::from(self.seconds_remaining.max(0)));

		if self.priority == RefreshPriority::Fresh {
			return;
		}

		headers.insert(EXPIRING, HeaderValue::from_static("true"));
		headers.insert(REFRESH_PRIORITY, HeaderValue::from_static(self.priority.as_str()));

		if self.priority.refresh_now() {
			headers.insert(REFRESH_NOW, HeaderValue::from_static("true"));
		}
	}
}
