//! Shared fixtures: signing keys, token minting, and a mocked key endpoint.

// std
use std::sync::Arc;
// crates.io
use base64::prelude::*;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use portal_auth::{
	AuthGate, GateConfig, KeyCache, KeyCacheConfig, ManualClock, MemoryPrincipalStore,
};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

pub const JWKS_PATH: &str = "/realms/dive/protocol/openid-connect/certs";

pub struct Fixture {
	pub pkcs8: &'static str,
	pub x: &'static str,
}

pub const PRIMARY: Fixture = Fixture {
	pkcs8: "MC4CAQAwBQYDK2VwBCIEIM8Df2PdUI7T4FSltVqCzXurMiVRc5cEw+qvKC9pHm6j",
	x: "6A-cWpkvKYTDRlqxUqCagz0Th9n0KiEuh4lou4se780",
};
pub const SECONDARY: Fixture = Fixture {
	pkcs8: "MC4CAQAwBQYDK2VwBCIEIB10JkvmNYv2p9aze3Ykxc6PyeFDxEol2cPBbGiXMGyg",
	x: "X3oXtRfk_u2TAVCmitOm_AaJ18wRg--aRkKV_1tuJCE",
};

pub fn jwks_body(keys: &[(&Fixture, &str)]) -> serde_json::Value {
	let keys = keys
		.iter()
		.map(|(fixture, kid)| {
			serde_json::json!({
				"kty": "OKP",
				"crv": "Ed25519",
				"x": fixture.x,
				"kid": kid,
				"alg": "EdDSA",
				"use": "sig",
			})
		})
		.collect::<Vec<_>>();

	serde_json::json!({ "keys": keys })
}

pub fn sign(fixture: &Fixture, kid: &str, sub: &str, exp: DateTime<Utc>) -> String {
	let der = BASE64_STANDARD.decode(fixture.pkcs8).expect("fixture pkcs8");
	let mut header = Header::new(Algorithm::EdDSA);
	let claims = serde_json::json!({
		"sub": sub,
		"preferred_username": format!("{sub}-user"),
		"iat": exp.timestamp() - 900,
		"exp": exp.timestamp(),
		"clearance": "SECRET",
		"countryOfAffiliation": "USA",
		"acpCOI": ["FVEY"],
		"roles": ["reader"],
	});

	header.kid = Some(kid.to_owned());

	jsonwebtoken::encode(&header, &claims, &EncodingKey::from_ed_der(&der)).expect("signed token")
}

pub async fn key_server(keys: &[(&Fixture, &str)], expected_fetches: u64) -> MockServer {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(jwks_body(keys))
				.insert_header("cache-control", "public, max-age=300"),
		)
		.expect(expected_fetches)
		.mount(&server)
		.await;

	server
}

pub fn key_config(server: &MockServer) -> KeyCacheConfig {
	KeyCacheConfig::new(format!("{}{JWKS_PATH}", server.uri()))
		.expect("key config")
		.with_require_https(false)
}

pub fn gate(server: &MockServer, clock: &Arc<ManualClock>) -> Arc<AuthGate> {
	let keys = KeyCache::http(key_config(server), clock.clone()).expect("key cache");

	Arc::new(
		AuthGate::new(
			&GateConfig::default(),
			Arc::new(keys),
			Arc::new(MemoryPrincipalStore::new()),
			clock.clone(),
		)
		.expect("gate"),
	)
}
