//! Signature and claim verification of bearer tokens.

// crates.io
use jsonwebtoken::{Algorithm, Validation, errors::ErrorKind};
// self
use crate::{
	_prelude::*,
	clock::SharedClock,
	config::{self, GateConfig},
	failure::AuthFailure,
	keys::KeyCache,
	token::{self, TokenClaims},
};

/// Verifies compact JWS tokens against keys from a [`KeyCache`].
///
/// Checks run cheapest first: header shape, expiry against the injected clock, algorithm
/// allowlist, key resolution, then the signature. An expired token therefore reports
/// [`AuthFailure::TokenExpired`] whatever its algorithm or signature. Results are not cached
/// here; that is the gate's job.
#[derive(Debug)]
pub struct TokenVerifier {
	keys: Arc<KeyCache>,
	clock: SharedClock,
	algorithms: Vec<Algorithm>,
	issuer: Option<String>,
	audience: Option<Vec<String>>,
}
impl TokenVerifier {
	/// Build a verifier with the algorithm allowlist and claim checks from `config`.
	///
	/// Symmetric algorithms in the configuration are dropped.
	pub fn new(keys: Arc<KeyCache>, config: &GateConfig, clock: SharedClock) -> Self {
		let algorithms =
			config.algorithms.iter().copied().filter(|alg| !config::is_symmetric(*alg)).collect();

		Self {
			keys,
			clock,
			algorithms,
			issuer: config.issuer.clone(),
			audience: config.audience.clone(),
		}
	}

	/// Key cache backing this verifier.
	pub fn keys(&self) -> &Arc<KeyCache> {
		&self.keys
	}

	/// Verify `token` and return its claims.
	pub async fn verify(&self, token: &str) -> std::result::Result<TokenClaims, AuthFailure> {
		let header = jsonwebtoken::decode_header(token)
			.map_err(|err| AuthFailure::malformed(format!("Unreadable token header: {err}.")))?;
		let kid = header
			.kid
			.as_deref()
			.filter(|kid| !kid.is_empty())
			.ok_or_else(|| AuthFailure::malformed("Token header has no 'kid'."))?;

		let exp = token::peek_times(token)?
			.exp
			.ok_or_else(|| AuthFailure::malformed("Token has no 'exp' claim."))?;

		if exp <= self.clock.unix_seconds() {
			return Err(AuthFailure::TokenExpired);
		}
		if !self.algorithms.contains(&header.alg) {
			return Err(AuthFailure::signature(format!(
				"Algorithm {:?} is not accepted.",
				header.alg
			)));
		}

		let key = self.keys.resolve(kid).await?;

		if !key.accepts(header.alg) {
			return Err(AuthFailure::signature(format!(
				"Key '{kid}' is not published for algorithm {:?}.",
				header.alg
			)));
		}

		let validation = self.validation(header.alg);
		let data = jsonwebtoken::decode::<TokenClaims>(token, &key.decoding_key, &validation)
			.map_err(classify)?;

		Ok(data.claims)
	}

	fn validation(&self, algorithm: Algorithm) -> Validation {
		let mut validation = Validation::new(algorithm);

		// Expiry was already checked against the injected clock.
		validation.validate_exp = false;
		validation.validate_aud = self.audience.is_some();

		if let Some(issuer) = &self.issuer {
			validation.set_issuer(&[issuer]);
		}
		if let Some(audience) = &self.audience {
			validation.set_audience(audience);
		}

		validation
	}
}

fn classify(err: jsonwebtoken::errors::Error) -> AuthFailure {
	match err.kind() {
		ErrorKind::ExpiredSignature => AuthFailure::TokenExpired,
		ErrorKind::InvalidToken
		| ErrorKind::Base64(_)
		| ErrorKind::Json(_)
		| ErrorKind::Utf8(_)
		| ErrorKind::MissingRequiredClaim(_) => AuthFailure::malformed(err.to_string()),
		ErrorKind::InvalidIssuer => AuthFailure::signature("Token issuer is not trusted."),
		ErrorKind::InvalidAudience => AuthFailure::signature("Token audience is not accepted."),
		_ => AuthFailure::signature(err.to_string()),
	}
}
