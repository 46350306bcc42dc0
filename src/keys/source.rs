//! Where key documents come from.

// std
use std::fmt::Debug;
// crates.io
use async_trait::async_trait;
use reqwest::Client;
// self
use crate::{
	_prelude::*,
	config::KeyCacheConfig,
	http::client::{self, KeyDocument},
};

/// Supplier of the identity provider's published key set.
///
/// One call is one attempt; the key cache decides when to call again.
#[async_trait]
pub trait KeySource: Debug + Send + Sync {
	/// Fetch the current key document.
	async fn fetch(&self) -> Result<KeyDocument>;
}

/// [`KeySource`] that GETs a JWKS document over HTTPS.
#[derive(Clone, Debug)]
pub struct HttpKeySource {
	client: Client,
	config: Arc<KeyCacheConfig>,
}
impl HttpKeySource {
	/// Validate `config` and build a hardened client for it.
	pub fn new(mut config: KeyCacheConfig) -> Result<Self> {
		config.normalize_allowed_domains();
		config.validate()?;

		let client = client::upstream_client(
			config.require_https,
			&config.allowed_domains,
			config.max_redirects,
			config.fetch_timeout,
		)?;

		Ok(Self { client, config: Arc::new(config) })
	}

	/// Use a caller-supplied client (primarily for tests).
	pub fn with_client(config: KeyCacheConfig, client: Client) -> Self {
		Self { client, config: Arc::new(config) }
	}

	/// Configuration in use.
	pub fn config(&self) -> &KeyCacheConfig {
		&self.config
	}
}
#[async_trait]
impl KeySource for HttpKeySource {
	async fn fetch(&self) -> Result<KeyDocument> {
		client::fetch_jwks(&self.client, &self.config).await
	}
}
