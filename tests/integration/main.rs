//! Integration tests against mocked identity provider endpoints.

mod common;
mod gate_router;
mod key_endpoint;
mod session_refresh;
