//! Integration tests for cold/warm lookups and credential rotation.

// crates.io
use rep_orchestrator::{LookupOptions, LookupStatus, Orchestrator, OrchestratorConfig};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

fn stats_body(malicious: u32, suspicious: u32, harmless: u32, undetected: u32) -> serde_json::Value {
	serde_json::json!({
		"data": {
			"attributes": {
				"last_analysis_stats": {
					"malicious": malicious,
					"suspicious": suspicious,
					"harmless": harmless,
					"undetected": undetected,
				}
			}
		}
	})
}

#[tokio::test]
async fn cold_lookup_hits_upstream_then_warm_lookup_hits_cache() {
	let server = MockServer::start().await;
	let domain = "first-seen.example.org";

	Mock::given(method("GET"))
		.and(path(format!("/domains/{domain}")))
		.respond_with(ResponseTemplate::new(200).set_body_json(stats_body(12, 3, 40, 5)))
		.expect(1)
		.mount(&server)
		.await;

	let config = OrchestratorConfig::new(["demo-key"], server.uri()).unwrap();
	let orchestrator = Orchestrator::new(config).unwrap();

	let cold = orchestrator.lookup(domain, LookupOptions::default()).await.unwrap();
	assert_eq!(cold.status, LookupStatus::ServedLive);
	assert_eq!(cold.summary.unwrap().malicious, 12);

	let warm = orchestrator.lookup(domain, LookupOptions::default()).await.unwrap();
	assert_eq!(warm.status, LookupStatus::ServedFromCache);
	assert_eq!(warm.summary.unwrap().malicious, 12);
}

#[tokio::test]
async fn a_500_response_retries_the_same_credential_without_counting_as_rotation() {
	let server = MockServer::start().await;
	let ip = "203.0.113.77";

	Mock::given(method("GET"))
		.and(path(format!("/ip_addresses/{ip}")))
		.respond_with(ResponseTemplate::new(500))
		.up_to_n_times(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path(format!("/ip_addresses/{ip}")))
		.respond_with(ResponseTemplate::new(200).set_body_json(stats_body(0, 0, 55, 1)))
		.mount(&server)
		.await;

	let mut config = OrchestratorConfig::new(["only-key"], server.uri()).unwrap();
	config.backoff.base = std::time::Duration::from_millis(1);
	config.backoff.cap = std::time::Duration::from_millis(5);

	let orchestrator = Orchestrator::new(config).unwrap();
	let result = orchestrator.lookup(ip, LookupOptions::default()).await.unwrap();

	assert_eq!(result.status, LookupStatus::ServedLive);

	let stats = orchestrator.stats().await;
	assert_eq!(stats.key_rotations, 0);
}

#[tokio::test]
async fn a_401_response_rotates_to_the_next_credential() {
	let server = MockServer::start().await;
	let hash = "d".repeat(64);

	Mock::given(method("GET"))
		.and(path(format!("/files/{hash}")))
		.respond_with(ResponseTemplate::new(401))
		.up_to_n_times(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path(format!("/files/{hash}")))
		.respond_with(ResponseTemplate::new(200).set_body_json(stats_body(30, 0, 20, 10)))
		.mount(&server)
		.await;

	let config = OrchestratorConfig::new(["key-a", "key-b"], server.uri()).unwrap();
	let orchestrator = Orchestrator::new(config).unwrap();

	let result = orchestrator.lookup(hash, LookupOptions::default()).await.unwrap();

	assert_eq!(result.status, LookupStatus::ServedLive);

	let stats = orchestrator.stats().await;
	assert_eq!(stats.key_rotations, 1);
}
