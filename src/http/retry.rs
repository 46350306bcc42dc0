//! Attempt budgeting and backoff for retried upstream exchanges.

// std
use std::future::Future;
// crates.io
use tokio::time;
// self
use crate::{_prelude::*, config::RetryPolicy};

/// Result of budgeting an attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptBudget {
	/// Another attempt may run with this timeout.
	Granted {
		/// Timeout for the upcoming attempt.
		timeout: Duration,
	},
	/// The overall deadline has passed.
	Exhausted,
}

/// Tracks retries consumed and time left under a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryExecutor<'a> {
	policy: &'a RetryPolicy,
	deadline: Instant,
	retries_used: u32,
}
impl<'a> RetryExecutor<'a> {
	/// Start a retry window now.
	pub fn new(policy: &'a RetryPolicy) -> Self {
		Self { policy, deadline: Instant::now() + policy.deadline, retries_used: 0 }
	}

	/// Budget the next attempt.
	pub fn attempt_budget(&self) -> AttemptBudget {
		match self.remaining_budget().min(self.policy.attempt_timeout) {
			timeout if timeout.is_zero() => AttemptBudget::Exhausted,
			timeout => AttemptBudget::Granted { timeout },
		}
	}

	/// Whether the policy allows another retry.
	pub fn can_retry(&self) -> bool {
		self.retries_used < self.policy.max_retries
	}

	/// Time left before the overall deadline.
	pub fn remaining_budget(&self) -> Duration {
		self.deadline.saturating_duration_since(Instant::now())
	}

	/// Retries consumed so far.
	pub fn retries_used(&self) -> u32 {
		self.retries_used
	}

	/// Consume a retry and return the delay before it, bounded by the remaining budget.
	pub fn next_backoff(&mut self) -> Option<Duration> {
		if !self.can_retry() {
			tracing::debug!(retries = self.retries_used, "retry budget exhausted");

			return None;
		}

		let attempt = self.retries_used;

		self.retries_used += 1;

		let delay = self.policy.compute_backoff(attempt).min(self.remaining_budget());

		tracing::debug!(attempt = attempt + 1, ?delay, "retry backoff computed");

		Some(delay)
	}
}

/// Run `attempt` until it succeeds, returns a non-retryable error, or the policy is exhausted.
///
/// Each attempt receives its timeout; an attempt that overruns it yields the error built by
/// `on_timeout`. The last error is returned on exhaustion.
pub async fn run_with_retry<T, E, F, Fut>(
	policy: &RetryPolicy,
	mut attempt: F,
	is_retryable: impl Fn(&E) -> bool,
	on_timeout: impl Fn(Duration) -> E,
) -> std::result::Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = std::result::Result<T, E>>,
{
	let mut executor = RetryExecutor::new(policy);
	let mut last_error = None;

	while let AttemptBudget::Granted { timeout } = executor.attempt_budget() {
		let outcome = match time::timeout(timeout, attempt()).await {
			Ok(outcome) => outcome,
			Err(_) => Err(on_timeout(timeout)),
		};
		let err = match outcome {
			Ok(value) => return Ok(value),
			Err(err) if !is_retryable(&err) => return Err(err),
			Err(err) => err,
		};

		last_error = Some(err);

		match executor.next_backoff() {
			Some(delay) if !delay.is_zero() => time::sleep(delay).await,
			Some(_) => {},
			None => break,
		}
	}

	Err(last_error.unwrap_or_else(|| on_timeout(Duration::ZERO)))
}
