//! Upstream endpoint hygiene: HTTPS enforcement and host allowlists.
//!
//! Calls to the identity provider (key endpoint and token endpoint, redirects included) go through
//! [`check_upstream`] so a misconfigured or redirected URL cannot downgrade transport security or
//! leave the trusted domain.

// std
use std::collections::HashSet;
// crates.io
use serde::{Deserialize, de::Deserializer};
use url::Url;
// self
use crate::_prelude::*;

/// Canonicalise a DNS name by trimming whitespace, removing any trailing dot, and lowercasing.
pub fn canonicalize_dns_name(value: &str) -> Option<String> {
	let trimmed = value.trim().trim_end_matches('.');

	if trimmed.is_empty() {
		return None;
	}

	Some(trimmed.to_ascii_lowercase())
}

/// Canonicalise allowlist entries, dropping empties and duplicates while keeping order.
pub fn normalize_allowlist(domains: Vec<String>) -> Vec<String> {
	let mut seen = HashSet::new();

	domains
		.into_iter()
		.filter_map(|domain| canonicalize_dns_name(&domain))
		.filter(|domain| seen.insert(domain.clone()))
		.collect()
}

/// `serde` helper normalising allowlist domains during deserialisation.
pub fn deserialize_allowed_domains<'de, D>(
	deserializer: D,
) -> std::result::Result<Vec<String>, D::Error>
where
	D: Deserializer<'de>,
{
	Ok(normalize_allowlist(Vec::<String>::deserialize(deserializer)?))
}

/// Ensure the URL uses HTTPS.
pub fn enforce_https(url: &Url) -> Result<()> {
	if url.scheme() == "https" {
		Ok(())
	} else {
		Err(Error::Security(format!("Upstream URL {url} must use HTTPS.")))
	}
}

/// Whether `host` equals or is a subdomain of an allowlisted domain.
///
/// An empty allowlist admits every host.
pub fn host_is_allowed(host: &str, allowed_domains: &[String]) -> bool {
	if allowed_domains.is_empty() {
		return true;
	}

	let Some(host) = canonicalize_dns_name(host) else {
		return false;
	};

	allowed_domains.iter().filter_map(|domain| canonicalize_dns_name(domain)).any(|domain| {
		host == domain || host.strip_suffix(&domain).is_some_and(|prefix| prefix.ends_with('.'))
	})
}

/// Apply the HTTPS requirement and host allowlist to an upstream URL.
pub fn check_upstream(url: &Url, require_https: bool, allowed_domains: &[String]) -> Result<()> {
	if require_https {
		enforce_https(url)?;
	}

	let host = url
		.host_str()
		.ok_or_else(|| Error::Security(format!("Upstream URL {url} has no host.")))?;

	if !host_is_allowed(host, allowed_domains) {
		return Err(Error::Security(format!(
			"Upstream host '{host}' is outside the configured allowlist."
		)));
	}

	Ok(())
}
