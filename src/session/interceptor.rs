//! Outbound HTTP client that keeps requests authenticated.

// crates.io
use reqwest::{
	Client, IntoUrl, Request, Response, StatusCode,
	header::{AUTHORIZATION, HeaderValue},
};
// self
use crate::{_prelude::*, advisory, session::coordinator::SessionCoordinator};

/// `reqwest` client wrapper driven by a [`SessionCoordinator`].
///
/// Every call carries the current access token, refreshed first when inside the buffer. A `401`
/// triggers exactly one refresh and retry per call; requests whose body cannot be cloned are not
/// retried. A server advising `X-Token-Refresh-Now` starts a background refresh.
#[derive(Clone, Debug)]
pub struct SessionClient {
	client: Client,
	coordinator: SessionCoordinator,
}
impl SessionClient {
	/// Wrap `client`.
	pub fn new(client: Client, coordinator: SessionCoordinator) -> Self {
		Self { client, coordinator }
	}

	/// Underlying coordinator.
	pub fn coordinator(&self) -> &SessionCoordinator {
		&self.coordinator
	}

	/// `GET url` with session handling.
	pub async fn get(&self, url: impl IntoUrl) -> Result<Response> {
		let request = self.client.get(url).build()?;

		self.execute(request).await
	}

	/// Send `request` with session handling.
	#[tracing::instrument(skip_all, fields(method = %request.method(), url = %request.url()))]
	pub async fn execute(&self, request: Request) -> Result<Response> {
		let replay = request.try_clone();
		let token = self.coordinator.ensure_fresh().await?;
		let response = self.send(request, &token).await?;

		if response.status() != StatusCode::UNAUTHORIZED {
			self.honour_advisory(&response, &token);

			return Ok(response);
		}

		let Some(replay) = replay else {
			tracing::debug!("401 on a request that cannot be replayed");

			return Ok(response);
		};

		tracing::debug!("401 received; refreshing once and retrying");

		let token = self.coordinator.refresh_replacing(Some(&token)).await?;
		let response = self.send(replay, &token).await?;

		self.honour_advisory(&response, &token);

		Ok(response)
	}

	async fn send(&self, mut request: Request, token: &str) -> Result<Response> {
		let value = HeaderValue::from_str(&format!("Bearer {token}"))
			.map_err(|err| Error::Session(format!("Access token is not a valid header: {err}.")))?;

		request.headers_mut().insert(AUTHORIZATION, value);

		Ok(self.client.execute(request).await?)
	}

	fn honour_advisory(&self, response: &Response, token: &str) {
		let refresh_now = response
			.headers()
			.get(advisory::REFRESH_NOW)
			.is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"true"));

		if !refresh_now {
			return;
		}

		let coordinator = self.coordinator.clone();
		let observed = token.to_owned();

		tokio::spawn(async move {
			if let Err(failure) = coordinator.refresh_replacing(Some(&observed)).await {
				tracing::debug!(%failure, "advised refresh did not complete");
			}
		});
	}
}
