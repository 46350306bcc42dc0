//! Single-flight refresh coordinator for the client session.

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	sync::{
		PoisonError, RwLock,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use futures::{
	FutureExt,
	future::{BoxFuture, Shared},
};
use tokio::{
	sync::{Mutex, watch},
	time,
};
// self
use crate::{
	_prelude::*,
	clock::SharedClock,
	config::SessionConfig,
	failure::AuthFailure,
	http::retry,
	metrics,
	session::{
		endpoint::{ExchangeError, HttpTokenEndpoint, TokenEndpoint, TokenGrant},
		state::{SessionEvent, SessionPhase, SessionState, SessionTokens},
		storage::SessionStorage,
	},
};

type RefreshFlight = Shared<BoxFuture<'static, std::result::Result<String, AuthFailure>>>;

enum RefreshPhase {
	Idle,
	Refreshing(RefreshFlight),
	ReauthRequired,
}
impl Debug for RefreshPhase {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self {
			Self::Idle => f.write_str("Idle"),
			Self::Refreshing(_) => f.write_str("Refreshing"),
			Self::ReauthRequired => f.write_str("ReauthRequired"),
		}
	}
}

#[derive(Debug)]
struct Inner {
	config: SessionConfig,
	endpoint: Arc<dyn TokenEndpoint>,
	storage: Arc<dyn SessionStorage>,
	clock: SharedClock,
	tokens: RwLock<Option<SessionTokens>>,
	phase: Mutex<RefreshPhase>,
	// Bumped by login and logout so a flight started before them cannot overwrite their pair.
	generation: AtomicU64,
	events: watch::Sender<SessionEvent>,
}
impl Inner {
	fn current(&self) -> Option<SessionTokens> {
		self.tokens.read().unwrap_or_else(PoisonError::into_inner).clone()
	}

	fn replace_tokens(&self, tokens: Option<SessionTokens>) {
		*self.tokens.write().unwrap_or_else(PoisonError::into_inner) = tokens;
	}

	fn reauth_failure(&self) -> AuthFailure {
		AuthFailure::RefreshFailed {
			reason: format!("Re-authentication required at {}.", self.config.login_url),
		}
	}

	#[tracing::instrument(skip(self, refresh_token))]
	async fn run_refresh(
		self: Arc<Self>,
		refresh_token: String,
		generation: u64,
	) -> std::result::Result<String, AuthFailure> {
		let started = Instant::now();
		let endpoint = &self.endpoint;
		let presented = refresh_token.as_str();
		let exchange = retry::run_with_retry(
			&self.config.retry_policy,
			move || endpoint.refresh(presented),
			ExchangeError::is_retryable,
			|timeout| ExchangeError::Unavailable(format!("Attempt timed out after {timeout:?}.")),
		);
		let outcome = time::timeout(self.config.refresh_ceiling, exchange).await.unwrap_or_else(
			|_| Err(ExchangeError::Unavailable("Refresh exceeded its time ceiling.".into())),
		);

		match outcome {
			Ok(grant) => self.finish_success(grant, refresh_token, generation, started).await,
			Err(err) => self.finish_failure(err, generation, started).await,
		}
	}

	async fn finish_success(
		&self,
		grant: TokenGrant,
		previous_refresh: String,
		generation: u64,
		started: Instant,
	) -> std::result::Result<String, AuthFailure> {
		let mut tokens = SessionTokens::from_pair(
			grant.access_token,
			grant.refresh_token.unwrap_or(previous_refresh),
		);

		if tokens.expires_at.is_none()
			&& let Some(expires_in) = grant.expires_in
		{
			tokens.expires_at = i64::try_from(expires_in)
				.ok()
				.and_then(TimeDelta::try_seconds)
				.map(|lifetime| self.clock.now() + lifetime);
		}

		let mut phase = self.phase.lock().await;

		if self.generation.load(Ordering::Acquire) != generation {
			tracing::debug!("session changed during refresh; discarding grant");

			return self.current().map(|current| current.access_token).ok_or_else(|| {
				AuthFailure::RefreshFailed { reason: "Session ended during refresh.".into() }
			});
		}

		self.replace_tokens(Some(tokens.clone()));

		if let Err(err) = self.storage.save(&tokens).await {
			tracing::warn!(error = %err, "failed to persist refreshed session");
		}

		*phase = RefreshPhase::Idle;

		drop(phase);

		tracing::info!(expires_at = ?tokens.expires_at, "session refreshed");
		metrics::record_session_refresh("success", started.elapsed());

		self.events.send_replace(SessionEvent::Refreshed { expires_at: tokens.expires_at });

		Ok(tokens.access_token)
	}

	async fn finish_failure(
		&self,
		err: ExchangeError,
		generation: u64,
		started: Instant,
	) -> std::result::Result<String, AuthFailure> {
		let mut phase = self.phase.lock().await;

		if self.generation.load(Ordering::Acquire) != generation {
			return Err(AuthFailure::RefreshFailed { reason: err.to_string() });
		}

		self.replace_tokens(None);

		if let Err(err) = self.storage.clear().await {
			tracing::warn!(error = %err, "failed to clear session storage");
		}

		*phase = RefreshPhase::ReauthRequired;

		drop(phase);

		tracing::warn!(error = %err, "session refresh failed; re-authentication required");
		metrics::record_session_refresh("reauth_required", started.elapsed());

		self.events
			.send_replace(SessionEvent::ReauthRequired { login_url: self.config.login_url.clone() });

		Err(AuthFailure::RefreshFailed { reason: err.to_string() })
	}
}

/// Owns the client's token pair and serialises refreshes.
///
/// At most one refresh exchange runs at a time; concurrent callers await the same shared flight.
/// The flight runs on its own task, so a caller that gives up does not cancel it. A failed
/// refresh clears the pair and parks the coordinator in `ReauthRequired` until
/// [`SessionCoordinator::complete_login`] installs a new one.
#[derive(Clone, Debug)]
pub struct SessionCoordinator {
	inner: Arc<Inner>,
}
impl SessionCoordinator {
	/// Coordinator over `endpoint` and `storage`. Call [`Self::initialize`] before use.
	pub fn new(
		config: SessionConfig,
		endpoint: Arc<dyn TokenEndpoint>,
		storage: Arc<dyn SessionStorage>,
		clock: SharedClock,
	) -> Result<Self> {
		config.validate()?;

		let (events, _) = watch::channel(SessionEvent::Idle);

		Ok(Self {
			inner: Arc::new(Inner {
				config,
				endpoint,
				storage,
				clock,
				tokens: RwLock::new(None),
				phase: Mutex::new(RefreshPhase::Idle),
				generation: AtomicU64::new(0),
				events,
			}),
		})
	}

	/// Coordinator exchanging tokens with the configured HTTP endpoint.
	pub fn http(
		config: SessionConfig,
		storage: Arc<dyn SessionStorage>,
		clock: SharedClock,
	) -> Result<Self> {
		let endpoint = Arc::new(HttpTokenEndpoint::new(&config)?);

		Self::new(config, endpoint, storage, clock)
	}

	/// Session configuration.
	pub fn config(&self) -> &SessionConfig {
		&self.inner.config
	}

	/// Subscribe to session events.
	pub fn subscribe(&self) -> watch::Receiver<SessionEvent> {
		self.inner.events.subscribe()
	}

	/// Load a persisted pair, if any, and return the resulting state.
	pub async fn initialize(&self) -> Result<SessionState> {
		let stored = self.inner.storage.load().await?;

		if let Some(tokens) = stored {
			let mut phase = self.inner.phase.lock().await;
			let expires_at = tokens.expires_at;

			self.inner.replace_tokens(Some(tokens));

			*phase = RefreshPhase::Idle;

			drop(phase);

			tracing::debug!(?expires_at, "session restored from storage");

			self.inner.events.send_replace(SessionEvent::LoggedIn { expires_at });
		}

		Ok(self.state().await)
	}

	/// Install a pair obtained by an interactive login, leaving `ReauthRequired`.
	pub async fn complete_login(&self, tokens: SessionTokens) -> Result<()> {
		let mut phase = self.inner.phase.lock().await;

		self.inner.generation.fetch_add(1, Ordering::AcqRel);
		self.inner.storage.save(&tokens).await?;

		let expires_at = tokens.expires_at;

		self.inner.replace_tokens(Some(tokens));

		*phase = RefreshPhase::Idle;

		drop(phase);

		tracing::info!(?expires_at, "session established");

		self.inner.events.send_replace(SessionEvent::LoggedIn { expires_at });

		Ok(())
	}

	/// Forget the pair locally and in storage.
	pub async fn logout(&self) -> Result<()> {
		let mut phase = self.inner.phase.lock().await;

		self.inner.generation.fetch_add(1, Ordering::AcqRel);
		self.inner.replace_tokens(None);

		*phase = RefreshPhase::Idle;

		self.inner.storage.clear().await?;

		drop(phase);

		self.inner.events.send_replace(SessionEvent::LoggedOut);

		Ok(())
	}

	/// Current access token, without refreshing.
	pub fn access_token(&self) -> Option<String> {
		self.inner.current().map(|tokens| tokens.access_token)
	}

	/// Snapshot of the session.
	pub async fn state(&self) -> SessionState {
		let now = self.inner.clock.now();
		let tokens = self.inner.current();
		let phase = match &*self.inner.phase.lock().await {
			RefreshPhase::Refreshing(_) => SessionPhase::Refreshing,
			RefreshPhase::ReauthRequired => SessionPhase::ReauthRequired,
			RefreshPhase::Idle if tokens.is_some() => SessionPhase::Active,
			RefreshPhase::Idle => SessionPhase::SignedOut,
		};

		SessionState {
			phase,
			seconds_remaining: tokens.as_ref().and_then(|tokens| tokens.seconds_remaining(now)),
			expiring_soon: tokens
				.as_ref()
				.is_some_and(|tokens| tokens.expiring_within(now, self.inner.config.refresh_buffer)),
		}
	}

	/// Access token that is outside the refresh buffer, refreshing first when needed.
	pub async fn ensure_fresh(&self) -> std::result::Result<String, AuthFailure> {
		let Some(tokens) = self.inner.current() else {
			return Err(self.not_signed_in().await);
		};

		if !tokens.expiring_within(self.inner.clock.now(), self.inner.config.refresh_buffer) {
			return Ok(tokens.access_token);
		}

		self.refresh_replacing(Some(&tokens.access_token)).await
	}

	/// One monitor pass: refresh when the held token is inside the buffer.
	///
	/// Returns `None` when nothing needed doing.
	pub async fn check_expiry(&self) -> Option<std::result::Result<String, AuthFailure>> {
		let tokens = self.inner.current()?;
		let now = self.inner.clock.now();

		tracing::trace!(seconds_remaining = tokens.seconds_remaining(now), "session expiry check");

		if !tokens.expiring_within(now, self.inner.config.refresh_buffer) {
			return None;
		}

		Some(self.refresh_replacing(Some(&tokens.access_token)).await)
	}

	/// Join or start a refresh that replaces `observed`.
	///
	/// When the held access token already differs from `observed` and is outside the buffer, it is
	/// returned without another exchange.
	pub async fn refresh_replacing(
		&self,
		observed: Option<&str>,
	) -> std::result::Result<String, AuthFailure> {
		let flight = {
			let mut phase = self.inner.phase.lock().await;

			match &*phase {
				RefreshPhase::Refreshing(flight) => {
					tracing::debug!("joining in-flight refresh");

					flight.clone()
				},
				RefreshPhase::ReauthRequired => return Err(self.inner.reauth_failure()),
				RefreshPhase::Idle => {
					let Some(tokens) = self.inner.current() else {
						return Err(AuthFailure::MissingToken);
					};
					let now = self.inner.clock.now();

					if observed.is_some_and(|observed| observed != tokens.access_token)
						&& !tokens.expiring_within(now, self.inner.config.refresh_buffer)
					{
						return Ok(tokens.access_token);
					}

					let flight = self.start_flight(tokens.refresh_token);

					*phase = RefreshPhase::Refreshing(flight.clone());

					flight
				},
			}
		};

		flight.await
	}

	fn start_flight(&self, refresh_token: String) -> RefreshFlight {
		let inner = self.inner.clone();
		let generation = inner.generation.load(Ordering::Acquire);
		let task = tokio::spawn(inner.run_refresh(refresh_token, generation));

		async move {
			task.await.unwrap_or_else(|err| {
				Err(AuthFailure::RefreshFailed { reason: format!("Refresh task failed: {err}.") })
			})
		}
		.boxed()
		.shared()
	}

	async fn not_signed_in(&self) -> AuthFailure {
		match &*self.inner.phase.lock().await {
			RefreshPhase::ReauthRequired => self.inner.reauth_failure(),
			_ => AuthFailure::MissingToken,
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicUsize;
	// crates.io
	use async_trait::async_trait;
	use url::Url;
	// self
	use super::*;
	use crate::{
		clock::ManualClock,
		config::{JitterStrategy, RetryPolicy},
		session::storage::MemorySessionStorage,
		testutil,
	};

	#[derive(Debug)]
	struct ScriptedEndpoint {
		clock: Arc<ManualClock>,
		calls: AtomicUsize,
		delay: Duration,
		failure: Option<ExchangeError>,
	}
	impl ScriptedEndpoint {
		fn new(clock: Arc<ManualClock>, delay: Duration) -> Arc<Self> {
			Arc::new(Self { clock, calls: AtomicUsize::new(0), delay, failure: None })
		}

		fn failing(clock: Arc<ManualClock>, failure: ExchangeError) -> Arc<Self> {
			Arc::new(Self {
				clock,
				calls: AtomicUsize::new(0),
				delay: Duration::ZERO,
				failure: Some(failure),
			})
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	#[async_trait]
	impl TokenEndpoint for ScriptedEndpoint {
		async fn refresh(
			&self,
			_refresh_token: &str,
		) -> std::result::Result<TokenGrant, ExchangeError> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

			time::sleep(self.delay).await;

			if let Some(failure) = &self.failure {
				return Err(failure.clone());
			}

			let exp = self.clock.now() + TimeDelta::minutes(15);

			Ok(TokenGrant {
				access_token: testutil::unsigned(&testutil::claims(&format!("u-{call}"), exp)),
				refresh_token: Some(format!("refresh-{call}")),
				expires_in: Some(900),
				token_type: Some("Bearer".into()),
			})
		}
	}

	fn config() -> SessionConfig {
		SessionConfig::new(
			"https://idp.example.mil/token",
			"portal",
			"https://portal.example.mil/login",
		)
		.expect("config")
		.with_retry_policy(RetryPolicy {
			max_retries: 1,
			attempt_timeout: Duration::from_secs(5),
			initial_backoff: Duration::from_millis(1),
			max_backoff: Duration::from_millis(2),
			deadline: Duration::from_secs(10),
			jitter: JitterStrategy::None,
		})
	}

	fn tokens_expiring_in(clock: &ManualClock, seconds: i64) -> SessionTokens {
		let exp = clock.now() + TimeDelta::seconds(seconds);

		SessionTokens::from_pair(testutil::unsigned(&testutil::claims("u-0", exp)), "refresh-0")
	}

	async fn coordinator(
		clock: &Arc<ManualClock>,
		endpoint: Arc<ScriptedEndpoint>,
		storage: Arc<MemorySessionStorage>,
	) -> SessionCoordinator {
		let coordinator = SessionCoordinator::new(config(), endpoint, storage, clock.clone())
			.expect("coordinator");

		coordinator.initialize().await.expect("initialize");

		coordinator
	}

	#[tokio::test]
	async fn concurrent_callers_share_one_exchange() {
		let clock = ManualClock::starting_now();
		let endpoint = ScriptedEndpoint::new(clock.clone(), Duration::from_millis(50));
		let storage = Arc::new(MemorySessionStorage::with_tokens(tokens_expiring_in(&clock, 20)));
		let coordinator = coordinator(&clock, endpoint.clone(), storage.clone()).await;
		let callers = (0..10).map(|_| {
			let coordinator = coordinator.clone();

			tokio::spawn(async move { coordinator.ensure_fresh().await })
		});
		let tokens = futures::future::join_all(callers).await;
		let tokens = tokens
			.into_iter()
			.map(|joined| joined.expect("joined").expect("refreshed"))
			.collect::<Vec<_>>();

		assert_eq!(endpoint.calls(), 1);
		assert!(tokens.iter().all(|token| token == &tokens[0]));
		assert_eq!(storage.snapshot().map(|pair| pair.refresh_token), Some("refresh-1".into()));
		assert_eq!(coordinator.state().await.phase, SessionPhase::Active);
	}

	#[tokio::test]
	async fn late_callers_reuse_the_replaced_token() {
		let clock = ManualClock::starting_now();
		let endpoint = ScriptedEndpoint::new(clock.clone(), Duration::ZERO);
		let storage = Arc::new(MemorySessionStorage::with_tokens(tokens_expiring_in(&clock, 20)));
		let coordinator = coordinator(&clock, endpoint.clone(), storage).await;
		let stale = coordinator.access_token().expect("token");
		let fresh = coordinator.ensure_fresh().await.expect("refreshed");
		let again = coordinator.refresh_replacing(Some(&stale)).await.expect("reused");

		assert_eq!(fresh, again);
		assert_eq!(endpoint.calls(), 1);
	}

	#[tokio::test]
	async fn abandoned_callers_do_not_cancel_the_flight() {
		let clock = ManualClock::starting_now();
		let endpoint = ScriptedEndpoint::new(clock.clone(), Duration::from_millis(100));
		let storage = Arc::new(MemorySessionStorage::with_tokens(tokens_expiring_in(&clock, 20)));
		let coordinator = coordinator(&clock, endpoint.clone(), storage).await;
		let impatient = time::timeout(Duration::from_millis(10), coordinator.ensure_fresh()).await;

		assert!(impatient.is_err());

		let mut events = coordinator.subscribe();

		events.changed().await.expect("event");

		assert!(matches!(*events.borrow(), SessionEvent::Refreshed { .. }));
		assert_eq!(endpoint.calls(), 1);
		assert_eq!(coordinator.state().await.phase, SessionPhase::Active);
	}

	#[tokio::test]
	async fn invalid_grant_requires_reauthentication() {
		let clock = ManualClock::starting_now();
		let endpoint = ScriptedEndpoint::failing(
			clock.clone(),
			ExchangeError::Rejected { error: "invalid_grant".into(), description: None },
		);
		let storage = Arc::new(MemorySessionStorage::with_tokens(tokens_expiring_in(&clock, 20)));
		let coordinator = coordinator(&clock, endpoint.clone(), storage.clone()).await;
		let events = coordinator.subscribe();

		assert!(matches!(
			coordinator.ensure_fresh().await,
			Err(AuthFailure::RefreshFailed { .. })
		));
		assert_eq!(endpoint.calls(), 1);
		assert!(storage.snapshot().is_none());
		assert_eq!(
			*events.borrow(),
			SessionEvent::ReauthRequired {
				login_url: Url::parse("https://portal.example.mil/login").expect("url"),
			}
		);
		assert_eq!(coordinator.state().await.phase, SessionPhase::ReauthRequired);

		// Terminal until a new login.
		assert!(coordinator.ensure_fresh().await.is_err());
		assert_eq!(endpoint.calls(), 1);

		coordinator.complete_login(tokens_expiring_in(&clock, 900)).await.expect("login");

		assert!(coordinator.ensure_fresh().await.is_ok());
		assert_eq!(coordinator.state().await.phase, SessionPhase::Active);
	}

	#[tokio::test]
	async fn unavailable_endpoint_is_retried_before_giving_up() {
		let clock = ManualClock::starting_now();
		let endpoint = ScriptedEndpoint::failing(
			clock.clone(),
			ExchangeError::Unavailable("connection refused".into()),
		);
		let storage = Arc::new(MemorySessionStorage::with_tokens(tokens_expiring_in(&clock, 20)));
		let coordinator = coordinator(&clock, endpoint.clone(), storage).await;

		assert!(coordinator.ensure_fresh().await.is_err());
		assert_eq!(endpoint.calls(), 2);
	}

	#[tokio::test]
	async fn fresh_tokens_skip_the_exchange() {
		let clock = ManualClock::starting_now();
		let endpoint = ScriptedEndpoint::new(clock.clone(), Duration::ZERO);
		let storage = Arc::new(MemorySessionStorage::with_tokens(tokens_expiring_in(&clock, 600)));
		let coordinator = coordinator(&clock, endpoint.clone(), storage).await;

		assert!(coordinator.check_expiry().await.is_none());
		assert!(coordinator.ensure_fresh().await.is_ok());

		clock.advance(Duration::from_secs(550));

		assert!(coordinator.check_expiry().await.is_some_and(|outcome| outcome.is_ok()));
		assert_eq!(endpoint.calls(), 1);
	}
}
