//! Bounded TTL caches backing the authentication gate.

pub mod bounded;
pub mod revocation;
pub mod validation;
