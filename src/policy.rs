//! Contract with the external policy decision point.
//!
//! The crate does not evaluate policy; it only shapes the request and distinguishes a denial from
//! an engine that could not be reached.

// std
use std::fmt::Debug;
// crates.io
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{_prelude::*, principal::Principal};

/// Subject side of an authorization request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAttributes {
	/// Subject identifier.
	#[serde(rename = "uniqueID")]
	pub unique_id: String,
	/// Clearance level.
	pub clearance: Option<String>,
	/// Country of affiliation.
	pub country_of_affiliation: Option<String>,
	/// Communities of interest.
	#[serde(rename = "acpCOI")]
	pub communities_of_interest: Vec<String>,
	/// Handling caveats.
	pub caveats: Vec<String>,
	/// Application roles.
	pub roles: Vec<String>,
}
impl From<&Principal> for SubjectAttributes {
	fn from(principal: &Principal) -> Self {
		Self {
			unique_id: principal.subject.clone(),
			clearance: principal.clearance.clone(),
			country_of_affiliation: principal.country.clone(),
			communities_of_interest: principal.communities_of_interest.clone(),
			caveats: principal.caveats.clone(),
			roles: principal.roles.clone(),
		}
	}
}

/// Resource side of an authorization request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAttributes {
	/// Resource identifier.
	pub resource_id: String,
	/// Classification marking.
	pub classification: Option<String>,
	/// Countries the resource may be released to.
	#[serde(default)]
	pub releasability_to: Vec<String>,
	/// Required communities of interest.
	#[serde(default, rename = "COI")]
	pub communities_of_interest: Vec<String>,
	/// Required caveats.
	#[serde(default)]
	pub caveats: Vec<String>,
}

/// Engine verdict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
	/// Whether access is granted.
	pub allowed: bool,
	/// Engine-provided reason.
	#[serde(default, alias = "reason")]
	pub explanation: String,
}

/// Failure to obtain a decision; a denial is not an error.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
	/// The engine could not be reached or answered with a server error.
	#[error("Policy engine unavailable: {0}")]
	Unavailable(String),
	/// The engine answered with something that is not a decision.
	#[error("Policy engine returned an invalid response: {0}")]
	InvalidResponse(String),
}
impl PolicyError {
	/// Whether the engine itself was unavailable.
	pub fn is_unavailable(&self) -> bool {
		matches!(self, Self::Unavailable(_))
	}
}
impl From<PolicyError> for Error {
	fn from(value: PolicyError) -> Self {
		Self::Policy(value.to_string())
	}
}

/// Decision point consulted per resource access.
#[async_trait]
pub trait PolicyEngine: Debug + Send + Sync {
	/// Decide whether `subject` may access `resource`.
	async fn decide(
		&self,
		subject: &SubjectAttributes,
		resource: &ResourceAttributes,
	) -> std::result::Result<PolicyDecision, PolicyError>;
}

#[derive(Serialize)]
struct DecisionRequest<'a> {
	subject: &'a SubjectAttributes,
	resource: &'a ResourceAttributes,
}

/// [`PolicyEngine`] reached over HTTP with a JSON `POST {subject, resource}`.
#[derive(Clone, Debug)]
pub struct HttpPolicyEngine {
	client: Client,
	endpoint: Url,
	timeout: Duration,
}
impl HttpPolicyEngine {
	/// Engine at `endpoint` with a 5 second request timeout.
	pub fn new(client: Client, endpoint: Url) -> Self {
		Self { client, endpoint, timeout: Duration::from_secs(5) }
	}

	/// Override the per-request timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}
}
#[async_trait]
impl PolicyEngine for HttpPolicyEngine {
	#[tracing::instrument(skip_all, fields(subject = %subject.unique_id, resource = %resource.resource_id))]
	async fn decide(
		&self,
		subject: &SubjectAttributes,
		resource: &ResourceAttributes,
	) -> std::result::Result<PolicyDecision, PolicyError> {
		let response = self
			.client
			.post(self.endpoint.clone())
			.timeout(self.timeout)
			.json(&DecisionRequest { subject, resource })
			.send()
			.await
			.map_err(|err| PolicyError::Unavailable(err.to_string()))?;
		let status = response.status();

		if status.is_server_error() {
			tracing::warn!(%status, "policy engine returned a server error");

			return Err(PolicyError::Unavailable(format!("HTTP {status}")));
		}
		if !status.is_success() {
			return Err(PolicyError::InvalidResponse(format!("HTTP {status}")));
		}

		let decision = response
			.json::<PolicyDecision>()
			.await
			.map_err(|err| PolicyError::InvalidResponse(err.to_string()))?;

		tracing::debug!(allowed = decision.allowed, "policy decision received");

		Ok(decision)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use wiremock::{
		Mock, MockServer, ResponseTemplate,
		matchers::{body_partial_json, method, path},
	};
	// self
	use super::*;

	fn subject() -> SubjectAttributes {
		SubjectAttributes {
			unique_id: "u-1".into(),
			clearance: Some("SECRET".into()),
			country_of_affiliation: Some("USA".into()),
			communities_of_interest: vec!["FVEY".into()],
			caveats: Vec::new(),
			roles: vec!["reader".into()],
		}
	}

	fn resource() -> ResourceAttributes {
		ResourceAttributes {
			resource_id: "doc-1".into(),
			classification: Some("SECRET".into()),
			..ResourceAttributes::default()
		}
	}

	#[tokio::test]
	async fn posts_attributes_and_reads_the_decision() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/authorize"))
			.and(body_partial_json(serde_json::json!({
				"subject": { "uniqueID": "u-1", "clearance": "SECRET" },
				"resource": { "resourceId": "doc-1" },
			})))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
				"allowed": false,
				"reason": "Insufficient clearance",
			})))
			.mount(&server)
			.await;

		let endpoint = Url::parse(&format!("{}/authorize", server.uri())).expect("url");
		let engine = HttpPolicyEngine::new(Client::new(), endpoint);
		let decision = engine.decide(&subject(), &resource()).await.expect("decision");

		assert!(!decision.allowed);
		assert_eq!(decision.explanation, "Insufficient clearance");
	}

	#[tokio::test]
	async fn server_errors_mean_unavailable() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(503))
			.mount(&server)
			.await;

		let engine = HttpPolicyEngine::new(Client::new(), Url::parse(&server.uri()).expect("url"));
		let err = engine.decide(&subject(), &resource()).await.expect_err("unavailable");

		assert!(err.is_unavailable());
		assert!(matches!(Error::from(err), Error::Policy(_)));
	}
}
