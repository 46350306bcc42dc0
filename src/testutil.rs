//! Fixtures shared by unit tests: Ed25519 keys, token minting, and scripted key sources.

// std
use std::sync::{
	Mutex as StdMutex, PoisonError,
	atomic::{AtomicBool, AtomicUsize, Ordering},
};
// crates.io
use async_trait::async_trait;
use base64::prelude::*;
use jsonwebtoken::{
	Algorithm, EncodingKey, Header,
	jwk::{Jwk, JwkSet},
};
use tokio::sync::{Mutex, MutexGuard};
// self
use crate::{_prelude::*, http::client::KeyDocument, keys::KeySource};

/// Ed25519 key pair: PKCS#8 private key (base64) and public `x` (base64url).
#[derive(Debug)]
pub struct Ed25519Fixture {
	pub pkcs8: &'static str,
	pub x: &'static str,
}

pub const KEY_A: Ed25519Fixture = Ed25519Fixture {
	pkcs8: "MC4CAQAwBQYDK2VwBCIEIM8Df2PdUI7T4FSltVqCzXurMiVRc5cEw+qvKC9pHm6j",
	x: "6A-cWpkvKYTDRlqxUqCagz0Th9n0KiEuh4lou4se780",
};
pub const KEY_B: Ed25519Fixture = Ed25519Fixture {
	pkcs8: "MC4CAQAwBQYDK2VwBCIEIB10JkvmNYv2p9aze3Ykxc6PyeFDxEol2cPBbGiXMGyg",
	x: "X3oXtRfk_u2TAVCmitOm_AaJ18wRg--aRkKV_1tuJCE",
};

pub fn jwk(fixture: &Ed25519Fixture, kid: &str) -> Jwk {
	serde_json::from_value(serde_json::json!({
		"kty": "OKP",
		"crv": "Ed25519",
		"x": fixture.x,
		"kid": kid,
		"alg": "EdDSA",
		"use": "sig",
	}))
	.expect("fixture jwk")
}

pub fn jwks(keys: &[(&Ed25519Fixture, &str)]) -> JwkSet {
	JwkSet { keys: keys.iter().map(|(fixture, kid)| jwk(fixture, kid)).collect() }
}

pub fn claims(sub: &str, exp: DateTime<Utc>) -> serde_json::Value {
	serde_json::json!({
		"sub": sub,
		"preferred_username": format!("{sub}-user"),
		"iat": exp.timestamp() - 900,
		"exp": exp.timestamp(),
		"email": format!("{sub}@example.mil"),
		"clearance": "SECRET",
		"countryOfAffiliation": "USA",
		"acpCOI": ["FVEY"],
		"caveats": [],
		"roles": ["reader"],
	})
}

pub fn sign(fixture: &Ed25519Fixture, kid: &str, claims: &serde_json::Value) -> String {
	let der = BASE64_STANDARD.decode(fixture.pkcs8).expect("fixture pkcs8");
	let mut header = Header::new(Algorithm::EdDSA);

	header.kid = Some(kid.to_owned());

	jsonwebtoken::encode(&header, claims, &EncodingKey::from_ed_der(&der)).expect("signed token")
}

/// Compact token with a readable payload and a junk signature.
pub fn unsigned(claims: &serde_json::Value) -> String {
	let header = BASE64_URL_SAFE_NO_PAD.encode(br#"{"alg":"EdDSA","typ":"JWT","kid":"k1"}"#);
	let payload = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).expect("claims"));

	format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// In-memory key source that counts fetches, can fail on demand, and can be held shut.
#[derive(Debug)]
pub struct StaticKeySource {
	document: StdMutex<JwkSet>,
	fetches: AtomicUsize,
	failing: AtomicBool,
	gate: Mutex<()>,
}
impl StaticKeySource {
	pub const TTL: Duration = Duration::from_secs(300);

	pub fn new(document: JwkSet) -> Arc<Self> {
		Arc::new(Self {
			document: StdMutex::new(document),
			fetches: AtomicUsize::new(0),
			failing: AtomicBool::new(false),
			gate: Mutex::new(()),
		})
	}

	pub fn fetches(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}

	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}

	pub fn publish(&self, document: JwkSet) {
		*self.document.lock().unwrap_or_else(PoisonError::into_inner) = document;
	}

	/// Hold every fetch until the guard is dropped.
	pub async fn block(&self) -> MutexGuard<'_, ()> {
		self.gate.lock().await
	}
}
#[async_trait]
impl KeySource for StaticKeySource {
	async fn fetch(&self) -> Result<KeyDocument> {
		self.fetches.fetch_add(1, Ordering::SeqCst);

		let _open = self.gate.lock().await;

		if self.failing.load(Ordering::SeqCst) {
			return Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into());
		}

		let jwks = self.document.lock().unwrap_or_else(PoisonError::into_inner).clone();

		Ok(KeyDocument { jwks, ttl: Self::TTL, elapsed: Duration::ZERO })
	}
}
