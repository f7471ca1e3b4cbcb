//! Integration tests for rate-limit queueing and exhausted credential pools.

// std
use std::time::Duration;
// crates.io
use chrono::Utc;
use rep_orchestrator::{LookupOptions, LookupStatus, Orchestrator, OrchestratorConfig};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

#[tokio::test]
async fn a_429_with_a_single_credential_queues_the_request_with_an_eta() {
	let server = MockServer::start().await;
	let domain = "throttled.example.com";

	Mock::given(method("GET"))
		.and(path(format!("/domains/{domain}")))
		.respond_with(ResponseTemplate::new(429).insert_header("retry-after", "45"))
		.mount(&server)
		.await;

	let config = OrchestratorConfig::new(["only-key"], server.uri()).unwrap();
	let orchestrator = Orchestrator::new(config).unwrap();

	let result = orchestrator.lookup(domain, LookupOptions::default()).await.unwrap();

	assert_eq!(result.status, LookupStatus::QueuedRateLimited);
	assert!(result.eta.is_some());

	let stats = orchestrator.stats().await;
	assert_eq!(stats.queued, 1);

	orchestrator.shutdown().await;
}

#[tokio::test]
async fn every_credential_rejected_fails_with_an_explanatory_message() {
	let server = MockServer::start().await;
	let domain = "blocked.example.net";

	Mock::given(method("GET"))
		.and(path(format!("/domains/{domain}")))
		.respond_with(ResponseTemplate::new(403))
		.mount(&server)
		.await;

	let config = OrchestratorConfig::new(["key-1", "key-2", "key-3"], server.uri()).unwrap();
	let orchestrator = Orchestrator::new(config).unwrap();

	let result = orchestrator.lookup(domain, LookupOptions::default()).await.unwrap();

	assert_eq!(result.status, LookupStatus::Failed);
	assert!(result.error.unwrap().contains("all attempts failed"));
}

#[tokio::test]
async fn a_retry_after_of_zero_falls_back_to_the_default_cooldown() {
	let server = MockServer::start().await;
	let domain = "zero-retry-after.example.net";

	Mock::given(method("GET"))
		.and(path(format!("/domains/{domain}")))
		.respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
		.mount(&server)
		.await;

	let mut config = OrchestratorConfig::new(["only-key"], server.uri()).unwrap();
	config.default_cooldown = Duration::from_millis(300);

	let orchestrator = Orchestrator::new(config).unwrap();
	let before = Utc::now();

	let result = orchestrator.lookup(domain, LookupOptions::default()).await.unwrap();

	assert_eq!(result.status, LookupStatus::QueuedRateLimited);

	let eta = result.eta.unwrap();

	// A literal `Retry-After: 0` must be treated as no hint at all and fall through to the
	// configured default cooldown, not honored as an immediate reset.
	assert!(eta >= before + chrono::Duration::milliseconds(250));

	orchestrator.shutdown().await;
}
