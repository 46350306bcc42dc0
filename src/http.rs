//! Upstream HTTP plumbing: client construction, key document fetches, cache lifetimes, and retries.

pub mod client;
pub mod retry;
pub mod semantics;
