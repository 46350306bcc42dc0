//! Client-side session coordination: token storage, single-flight refresh, background expiry
//! monitoring, and an HTTP interceptor that keeps outbound calls authenticated.

pub mod coordinator;
pub mod endpoint;
pub mod interceptor;
pub mod monitor;
pub mod state;
pub mod storage;

pub use coordinator::SessionCoordinator;
pub use endpoint::{ExchangeError, HttpTokenEndpoint, TokenEndpoint, TokenGrant};
pub use interceptor::SessionClient;
pub use monitor::{MonitorHandle, spawn_monitor};
pub use state::{SessionEvent, SessionPhase, SessionState, SessionTokens};
pub use storage::{FileSessionStorage, MemorySessionStorage, SessionStorage};
