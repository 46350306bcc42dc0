//! Typed request rejections surfaced by the gate, verifier, and session coordinator.

// std
use std::fmt::{Display, Formatter, Result as FmtResult};
// crates.io
use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Machine-readable reason a credential was not accepted.
///
/// Values are cheap to clone so negative outcomes can live in the validation cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthFailure {
	/// No `Authorization` header was presented.
	MissingToken,
	/// Header or token structure could not be parsed.
	MalformedToken {
		/// Human-readable parse failure.
		reason: String,
	},
	/// Signature did not verify or the algorithm is not acceptable.
	SignatureInvalid {
		/// Human-readable verification failure.
		reason: String,
	},
	/// The token's `exp` claim is in the past.
	TokenExpired,
	/// The token was explicitly revoked (logout).
	TokenRevoked,
	/// The signing key could not be resolved.
	KeyResolution {
		/// Human-readable resolution failure.
		reason: String,
		/// Whether the identity provider was unreachable (infrastructure) rather than the
		/// key being unknown.
		transient: bool,
	},
	/// Claims resolved to a subject without an active account.
	PrincipalNotFound {
		/// Subject identifier taken from the verified claims.
		subject: String,
	},
	/// The principal store could not be reached; the credential itself was accepted.
	PrincipalStoreUnavailable {
		/// Human-readable storage failure.
		reason: String,
	},
	/// The client could not exchange its refresh token.
	RefreshFailed {
		/// Human-readable refresh failure.
		reason: String,
	},
}
impl AuthFailure {
	/// Build a [`AuthFailure::MalformedToken`].
	pub fn malformed(reason: impl Into<String>) -> Self {
		Self::MalformedToken { reason: reason.into() }
	}

	/// Build a [`AuthFailure::SignatureInvalid`].
	pub fn signature(reason: impl Into<String>) -> Self {
		Self::SignatureInvalid { reason: reason.into() }
	}

	/// Build a [`AuthFailure::KeyResolution`] for an unreachable provider.
	pub fn key_unavailable(reason: impl Into<String>) -> Self {
		Self::KeyResolution { reason: reason.into(), transient: true }
	}

	/// Build a [`AuthFailure::KeyResolution`] for a `kid` the provider does not publish.
	pub fn unknown_key(kid: &str) -> Self {
		Self::KeyResolution {
			reason: format!("Signing key '{kid}' is not published by the identity provider."),
			transient: false,
		}
	}

	/// Stable code used in response bodies, logs, and metric labels.
	pub fn code(&self) -> &'static str {
		match self {
			Self::MissingToken => "missing_token",
			Self::MalformedToken { .. } => "malformed_token",
			Self::SignatureInvalid { .. } => "signature_invalid",
			Self::TokenExpired => "token_expired",
			Self::TokenRevoked => "token_revoked",
			Self::KeyResolution { .. } => "key_resolution_error",
			Self::PrincipalNotFound { .. } => "principal_not_found",
			Self::PrincipalStoreUnavailable { .. } => "principal_store_unavailable",
			Self::RefreshFailed { .. } => "refresh_failed",
		}
	}

	/// HTTP status used when the failure is rendered as a response.
	pub fn status(&self) -> StatusCode {
		match self {
			Self::KeyResolution { .. } | Self::PrincipalStoreUnavailable { .. } =>
				StatusCode::SERVICE_UNAVAILABLE,
			_ => StatusCode::UNAUTHORIZED,
		}
	}

	/// Whether the failure reflects infrastructure trouble rather than a bad credential.
	///
	/// Transient failures are never written to the validation cache.
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			Self::KeyResolution { transient: true, .. } | Self::PrincipalStoreUnavailable { .. }
		)
	}
}
impl Display for AuthFailure {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::MissingToken => write!(f, "Bearer token is required."),
			Self::MalformedToken { reason } => write!(f, "Malformed token: {reason}"),
			Self::SignatureInvalid { reason } => write!(f, "Invalid token signature: {reason}"),
			Self::TokenExpired => write!(f, "Token has expired."),
			Self::TokenRevoked => write!(f, "Token has been revoked."),
			Self::KeyResolution { reason, .. } => write!(f, "Signing key unavailable: {reason}"),
			Self::PrincipalNotFound { subject } =>
				write!(f, "No active account for subject '{subject}'."),
			Self::PrincipalStoreUnavailable { reason } =>
				write!(f, "Principal store unavailable: {reason}"),
			Self::RefreshFailed { reason } => write!(f, "Session refresh failed: {reason}"),
		}
	}
}
impl std::error::Error for AuthFailure {}
