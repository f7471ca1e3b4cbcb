//! Integration test for concurrent duplicate lookups sharing one upstream call.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use rep_orchestrator::{LookupOptions, LookupStatus, Orchestrator, OrchestratorConfig};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

#[tokio::test]
async fn concurrent_lookups_for_the_same_indicator_issue_a_single_upstream_call() {
	let server = MockServer::start().await;
	let ip = "198.51.100.200";

	Mock::given(method("GET"))
		.and(path(format!("/ip_addresses/{ip}")))
		.respond_with(
			ResponseTemplate::new(200)
				.set_body_json(serde_json::json!({
					"data": {
						"attributes": {
							"last_analysis_stats": {
								"malicious": 2, "suspicious": 0, "harmless": 58, "undetected": 0
							}
						}
					}
				}))
				.set_delay(Duration::from_millis(150)),
		)
		.expect(1)
		.mount(&server)
		.await;

	let config = OrchestratorConfig::new(["shared-key"], server.uri()).unwrap();
	let orchestrator = Arc::new(Orchestrator::new(config).unwrap());

	let mut handles = Vec::new();

	for _ in 0..5 {
		let orchestrator = orchestrator.clone();

		handles.push(tokio::spawn(async move {
			orchestrator.lookup(ip, LookupOptions::default()).await.unwrap()
		}));
	}

	let mut results = Vec::new();

	for handle in handles {
		results.push(handle.await.unwrap());
	}

	assert!(results.iter().all(|r| r.status == LookupStatus::ServedLive));
	assert!(results.iter().all(|r| r.summary.unwrap().malicious == 2));
}
