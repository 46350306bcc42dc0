//! Signing-key resolution against the identity provider's key-publishing endpoint.

pub mod cache;
pub mod slot;
pub mod source;

pub use self::{
	cache::{KeyCache, KeyState, KeyStatus},
	slot::SigningKey,
	source::{HttpKeySource, KeySource},
};
