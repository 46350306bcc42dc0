//! Background expiry monitor.

// crates.io
use tokio::{
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
// self
use crate::session::coordinator::SessionCoordinator;

/// Handle to a running monitor; the task stops when the handle is dropped.
#[derive(Debug)]
pub struct MonitorHandle {
	task: JoinHandle<()>,
}
impl MonitorHandle {
	/// Stop the monitor.
	pub fn abort(&self) {
		self.task.abort();
	}

	/// Whether the task has stopped.
	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}
}
impl Drop for MonitorHandle {
	fn drop(&mut self) {
		self.task.abort();
	}
}

/// Check the session every `check_interval` and refresh when the token is inside the buffer.
pub fn spawn_monitor(coordinator: SessionCoordinator) -> MonitorHandle {
	let period = coordinator.config().check_interval;
	let task = tokio::spawn(async move {
		let mut ticker = time::interval(period);

		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			ticker.tick().await;

			if let Some(Err(failure)) = coordinator.check_expiry().await {
				tracing::debug!(%failure, "background refresh did not complete");
			}
		}
	});

	MonitorHandle { task }
}
