//! Concurrent reputation orchestrator for IOC enrichment — a credential pool,
//! result cache, request coalescer, and rate-limit-aware scheduler sitting in
//! front of a third-party threat-intelligence API.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod coalescer;
pub mod config;
pub mod indicator;
pub mod keypool;
#[cfg(feature = "metrics")] pub mod metrics;
pub mod upstream;

mod error;
mod orchestrator;
mod scheduler;
mod _prelude {
	pub use std::{
		sync::Arc,
		time::{Duration, SystemTime},
	};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}
#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
#[cfg(feature = "metrics")] pub use crate::metrics::StatMetric;
pub use crate::{
	cache::Summary,
	config::{BackoffPolicy, OrchestratorConfig, RateLimitHeaders},
	error::{Error, Result},
	indicator::{Indicator, IndicatorKind},
	keypool::{Credential, CredentialStatus},
	orchestrator::{
		LookupOptions, LookupResult, LookupStatus, Orchestrator, OrchestratorBuilder, RateLimitInfo,
		StatsSnapshot,
	},
};

#[cfg(test)]
mod _test {
	use metrics_util as _;
	use tracing_subscriber as _;
	use wiremock as _;
}
