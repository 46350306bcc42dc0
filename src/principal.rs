//! Durable subject records derived from verified claims.

// std
use std::fmt::Debug;
// crates.io
use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, token::TokenClaims};

/// Account record for an authenticated subject.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
	/// Subject identifier from the identity provider.
	pub subject: String,
	/// Username.
	pub username: String,
	/// Contact email.
	pub email: Option<String>,
	/// Display name.
	pub name: Option<String>,
	/// Organization.
	pub organization: Option<String>,
	/// Country of affiliation.
	pub country: Option<String>,
	/// Clearance level.
	pub clearance: Option<String>,
	/// Handling caveats.
	pub caveats: Vec<String>,
	/// Communities of interest.
	pub communities_of_interest: Vec<String>,
	/// Application roles.
	pub roles: Vec<String>,
	/// First successful authentication.
	pub first_seen: DateTime<Utc>,
	/// Most recent successful authentication.
	pub last_seen: DateTime<Utc>,
	/// Whether the account may authenticate.
	pub active: bool,
}
impl Principal {
	/// New active principal built from `claims`.
	pub fn from_claims(claims: &TokenClaims, seen_at: DateTime<Utc>) -> Self {
		let mut principal = Self {
			subject: claims.sub.clone(),
			username: String::new(),
			email: None,
			name: None,
			organization: None,
			country: None,
			clearance: None,
			caveats: Vec::new(),
			communities_of_interest: Vec::new(),
			roles: Vec::new(),
			first_seen: seen_at,
			last_seen: seen_at,
			active: true,
		};

		principal.absorb(claims, seen_at);

		principal
	}

	/// Refresh mutable attributes from newer claims. The subject and `first_seen` never change.
	pub fn absorb(&mut self, claims: &TokenClaims, seen_at: DateTime<Utc>) {
		let attributes = &claims.attributes;

		self.username = claims.username.clone();
		self.email = claims.email.clone();
		self.name = claims.name.clone();
		self.organization = claims.organization.clone();
		self.country = attributes.country.clone();
		self.clearance = attributes.clearance.clone();
		self.caveats = attributes.caveats.clone();
		self.communities_of_interest = attributes.communities_of_interest.clone();
		self.roles = attributes.roles.clone();
		self.last_seen = self.last_seen.max(seen_at);
	}
}

/// Storage contract for principals.
///
/// The gate calls [`PrincipalStore::upsert`] on every admission. A subject that has no active
/// account must surface as [`Error::PrincipalNotFound`]; any other error is treated as a storage
/// outage.
#[async_trait]
pub trait PrincipalStore: Debug + Send + Sync {
	/// Create or update the principal for `claims` and return the stored record.
	async fn upsert(&self, claims: &TokenClaims, seen_at: DateTime<Utc>) -> Result<Principal>;

	/// Look up a principal by subject.
	async fn find(&self, subject: &str) -> Result<Option<Principal>>;
}

/// In-process [`PrincipalStore`].
///
/// With auto-provisioning (the default) unknown subjects are created on first sight; without it,
/// only subjects inserted up front may authenticate.
#[derive(Debug)]
pub struct MemoryPrincipalStore {
	principals: DashMap<String, Principal>,
	auto_provision: bool,
}
impl MemoryPrincipalStore {
	/// Store that provisions unknown subjects.
	pub fn new() -> Self {
		Self { principals: DashMap::new(), auto_provision: true }
	}

	/// Store that only admits pre-registered subjects.
	pub fn without_provisioning() -> Self {
		Self { principals: DashMap::new(), auto_provision: false }
	}

	/// Register or replace a principal.
	pub fn insert(&self, principal: Principal) {
		self.principals.insert(principal.subject.clone(), principal);
	}

	/// Deactivate a subject; later upserts fail with [`Error::PrincipalNotFound`].
	pub fn disable(&self, subject: &str) -> bool {
		self.principals.get_mut(subject).map(|mut principal| principal.active = false).is_some()
	}

	/// Number of stored principals.
	pub fn len(&self) -> usize {
		self.principals.len()
	}

	/// Whether the store is empty.
	pub fn is_empty(&self) -> bool {
		self.principals.is_empty()
	}
}
impl Default for MemoryPrincipalStore {
	fn default() -> Self {
		Self::new()
	}
}
#[async_trait]
impl PrincipalStore for MemoryPrincipalStore {
	async fn upsert(&self, claims: &TokenClaims, seen_at: DateTime<Utc>) -> Result<Principal> {
		match self.principals.entry(claims.sub.clone()) {
			Entry::Occupied(mut entry) => {
				let principal = entry.get_mut();

				if !principal.active {
					return Err(Error::PrincipalNotFound { subject: claims.sub.clone() });
				}

				principal.absorb(claims, seen_at);

				Ok(principal.clone())
			},
			Entry::Vacant(entry) if self.auto_provision => {
				tracing::info!(subject = %claims.sub, "provisioning principal on first sight");

				Ok(entry.insert(Principal::from_claims(claims, seen_at)).clone())
			},
			Entry::Vacant(_) => Err(Error::PrincipalNotFound { subject: claims.sub.clone() }),
		}
	}

	async fn find(&self, subject: &str) -> Result<Option<Principal>> {
		Ok(self.principals.get(subject).map(|principal| principal.clone()))
	}
}
