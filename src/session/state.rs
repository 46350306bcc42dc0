//! Session tokens, phases, snapshots, and published events.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, token};

/// Access and refresh token pair held by the client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
	/// Bearer token attached to outbound calls.
	pub access_token: String,
	/// Token exchanged for a new pair.
	pub refresh_token: String,
	/// Expiry read from the access token's payload; recomputed on load.
	#[serde(skip)]
	pub expires_at: Option<DateTime<Utc>>,
}
impl SessionTokens {
	/// Pair whose expiry is read from the access token.
	pub fn from_pair(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
		let access_token = access_token.into();
		let expires_at = token::peek_expiry(&access_token);

		Self { access_token, refresh_token: refresh_token.into(), expires_at }
	}

	/// Seconds until the access token expires, if its expiry is readable.
	pub fn seconds_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
		self.expires_at.map(|exp| (exp - now).num_seconds())
	}

	/// Whether the access token expires within `buffer`. Unreadable expiry counts as expiring.
	pub fn expiring_within(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
		let buffer = TimeDelta::from_std(buffer).unwrap_or(TimeDelta::MAX);

		self.expires_at.is_none_or(|exp| exp - now < buffer)
	}
}
impl Debug for SessionTokens {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		f.debug_struct("SessionTokens")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Coarse coordinator phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
	/// No tokens are held.
	SignedOut,
	/// Tokens are held and no refresh is running.
	Active,
	/// A refresh flight is running.
	Refreshing,
	/// Refresh failed; the user must log in again.
	ReauthRequired,
}

/// Snapshot of the client session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionState {
	/// Current phase.
	pub phase: SessionPhase,
	/// Seconds until the access token expires.
	pub seconds_remaining: Option<i64>,
	/// Whether the token is inside the refresh buffer.
	pub expiring_soon: bool,
}

/// Notification published on every session change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
	/// Nothing has happened yet.
	Idle,
	/// A pair was installed by login or restored from storage.
	LoggedIn {
		/// Access token expiry.
		expires_at: Option<DateTime<Utc>>,
	},
	/// A refresh replaced the pair.
	Refreshed {
		/// New access token expiry.
		expires_at: Option<DateTime<Utc>>,
	},
	/// Refresh failed terminally; the user must log in again.
	ReauthRequired {
		/// Where to send the user.
		login_url: Url,
	},
	/// The session was ended locally.
	LoggedOut,
}
