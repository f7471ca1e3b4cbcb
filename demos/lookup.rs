//! Looks up one indicator of compromise against a configured upstream and prints the verdict.
//!
//! ```text
//! REP_CREDENTIALS=key-one,key-two REP_UPSTREAM=https://www.virustotal.com/api/v3 \
//!     cargo run --example demo_lookup -- 8.8.8.8
//! ```

use rep_orchestrator::{LookupOptions, Orchestrator, OrchestratorConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt::init();

	let indicator = std::env::args().nth(1).ok_or("usage: demo_lookup <indicator>")?;
	let credentials = std::env::var("REP_CREDENTIALS").unwrap_or_else(|_| "demo-credential".into());
	let upstream = std::env::var("REP_UPSTREAM").unwrap_or_else(|_| "https://www.virustotal.com/api/v3".into());

	let config = OrchestratorConfig::new([credentials], upstream)?;
	let orchestrator = Orchestrator::new(config)?;

	let result = orchestrator.lookup(indicator, LookupOptions::default()).await?;

	println!("status: {:?}", result.status);

	if let Some(summary) = result.summary {
		println!(
			"malicious={} suspicious={} clean={} undetected={}",
			summary.malicious, summary.suspicious, summary.clean, summary.undetected
		);
	}
	if let Some(eta) = result.eta {
		println!("retry after: {eta}");
	}
	if let Some(reason) = result.error {
		println!("error: {reason}");
	}

	orchestrator.shutdown().await;

	Ok(())
}
