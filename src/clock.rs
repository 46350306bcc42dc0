//! Injectable wall-clock used by every cache and expiry computation.
//!
//! Token expiry is expressed in wall-clock seconds, so all TTL arithmetic in the crate goes
//! through a [`Clock`] instead of calling [`Utc::now`] directly. Tests drive time with
//! [`ManualClock`].

// std
use std::{
	fmt::Debug,
	sync::atomic::{AtomicI64, Ordering},
};
// self
use crate::_prelude::*;

/// Source of the current wall-clock time.
pub trait Clock: Debug + Send + Sync {
	/// Current UTC time.
	fn now(&self) -> DateTime<Utc>;

	/// Current time as whole seconds since the Unix epoch.
	fn unix_seconds(&self) -> i64 {
		self.now().timestamp()
	}
}

/// Shared handle to a clock implementation.
pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl SystemClock {
	/// Shared system clock handle.
	pub fn shared() -> SharedClock {
		Arc::new(Self)
	}
}
impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
	millis: AtomicI64,
}
impl ManualClock {
	/// Create a clock frozen at the given instant.
	pub fn new(start: DateTime<Utc>) -> Arc<Self> {
		Arc::new(Self { millis: AtomicI64::new(start.timestamp_millis()) })
	}

	/// Create a clock frozen at the current system time.
	pub fn starting_now() -> Arc<Self> {
		Self::new(Utc::now())
	}

	/// Move the clock forward.
	pub fn advance(&self, by: Duration) {
		let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);

		self.millis.fetch_add(delta, Ordering::SeqCst);
	}

	/// Jump to an absolute instant.
	pub fn set(&self, at: DateTime<Utc>) {
		self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
	}
}
impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
	}
}

/// Remaining lifetime between `now` and `deadline`, or `None` once the deadline has passed.
pub fn remaining(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Option<Duration> {
	(deadline - now).to_std().ok().filter(|left| !left.is_zero())
}
