//! Bearer-token gate and session coordination for a secure document portal: verification against
//! rotating signing keys, validation and revocation caches, expiry advisories, and a single-flight
//! client refresh coordinator.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod advisory;
pub mod cache;
pub mod clock;
pub mod config;
pub mod failure;
pub mod gate;
pub mod http;
pub mod keys;
pub mod metrics;
pub mod policy;
pub mod principal;
pub mod security;
pub mod server;
pub mod session;
pub mod token;
pub mod verifier;

mod error;
#[cfg(test)] mod testutil;
mod _prelude {
	pub use std::{
		sync::Arc,
		time::{Duration, SystemTime},
	};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result, clock::Clock};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	advisory::{ExpiryAdvisory, RefreshPriority},
	clock::{Clock, ManualClock, SharedClock, SystemClock},
	config::{GateConfig, JitterStrategy, KeyCacheConfig, RetryPolicy, SessionConfig},
	error::{Error, Result},
	failure::AuthFailure,
	gate::{Admission, AdmissionSource, AuthGate},
	keys::{HttpKeySource, KeyCache, KeySource},
	policy::{HttpPolicyEngine, PolicyDecision, PolicyEngine, PolicyError},
	principal::{MemoryPrincipalStore, Principal, PrincipalStore},
	server::middleware::CurrentPrincipal,
	session::{SessionClient, SessionCoordinator, SessionTokens},
	token::TokenClaims,
	verifier::TokenVerifier,
};
