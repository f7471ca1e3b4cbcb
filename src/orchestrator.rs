//! Public facade (§6): wires the Key Pool, Cache, Coalescer, Upstream Adapter
//! and Scheduler together behind `lookup`/`stats`/`clear_cache`/`drain_queue`.
//!
//! Grounded in the teacher's `RegistryBuilder`/`Registry` split
//! (`registry.rs`): a builder that validates configuration and constructs the
//! shared sub-modules once, producing a cheaply-cloneable-by-reference facade.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio_util::sync::CancellationToken;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::{Cache, Summary},
	coalescer::Coalescer,
	config::OrchestratorConfig,
	indicator::{Indicator, IndicatorKind},
	keypool::{Credential, KeyPool},
	scheduler::Scheduler,
	upstream::UpstreamClient,
};
#[cfg(feature = "metrics")] use crate::metrics::StatMetric;

/// Terminal status of a completed or queued lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupStatus {
	/// Answered from the local cache without contacting the upstream.
	ServedFromCache,
	/// Answered by a live upstream call.
	ServedLive,
	/// No credential was usable; the request was queued and will warm the cache in the
	/// background. The caller must re-request after `eta` to get a live answer.
	QueuedRateLimited,
	/// The lookup could not be completed.
	Failed,
}

/// Rate-limit quota observed alongside a live answer, when the upstream reported one.
#[derive(Clone, Copy, Debug, Default)]
pub struct RateLimitInfo {
	/// Remaining requests in the credential's current window.
	pub remaining: Option<i64>,
	/// Epoch time the window resets.
	pub reset_at: Option<DateTime<Utc>>,
}

/// Outcome of a single [`Orchestrator::lookup`] call.
#[derive(Clone, Debug)]
pub struct LookupResult {
	/// The normalized indicator this result answers.
	pub indicator: Indicator,
	/// Terminal status.
	pub status: LookupStatus,
	/// Verdict summary, present for `ServedFromCache` and `ServedLive`.
	pub summary: Option<Summary>,
	/// Id of the credential that served a live answer.
	pub credential_id: Option<String>,
	/// Rate-limit quota observed on a live answer, if the upstream reported one.
	pub rate_limit: Option<RateLimitInfo>,
	/// Estimated time a queued request will be retriable, when `status` is `QueuedRateLimited`.
	pub eta: Option<DateTime<Utc>>,
	/// Failure reason, present when `status` is `Failed`.
	pub error: Option<String>,
	/// Link to a human-facing UI for this indicator, when [`OrchestratorConfig::ui_base_url`]
	/// is configured.
	pub external_link: Option<String>,
}
impl LookupResult {
	/// Build a bare result carrying only its status and indicator; all other fields unset.
	pub fn new(status: LookupStatus, indicator: Indicator) -> Self {
		Self {
			indicator,
			status,
			summary: None,
			credential_id: None,
			rate_limit: None,
			eta: None,
			error: None,
			external_link: None,
		}
	}

	pub(crate) fn served_from_cache(indicator: Indicator, summary: Summary) -> Self {
		Self { summary: Some(summary), ..Self::new(LookupStatus::ServedFromCache, indicator) }
	}

	pub(crate) fn served_live(indicator: Indicator, summary: Summary, credential_id: impl Into<String>) -> Self {
		Self {
			summary: Some(summary),
			credential_id: Some(credential_id.into()),
			..Self::new(LookupStatus::ServedLive, indicator)
		}
	}

	pub(crate) fn queued(indicator: Indicator, eta: Option<DateTime<Utc>>) -> Self {
		Self { eta, ..Self::new(LookupStatus::QueuedRateLimited, indicator) }
	}

	pub(crate) fn failed(indicator: Indicator, reason: impl Into<String>) -> Self {
		Self { error: Some(reason.into()), ..Self::new(LookupStatus::Failed, indicator) }
	}

	pub(crate) fn with_rate_limit(mut self, remaining: Option<i64>, reset_at: Option<DateTime<Utc>>) -> Self {
		self.rate_limit = Some(RateLimitInfo { remaining, reset_at });

		self
	}
}

/// Per-call overrides for [`Orchestrator::lookup`].
#[derive(Clone, Default)]
pub struct LookupOptions {
	/// Assert the indicator's kind instead of relying on detection.
	pub kind: Option<IndicatorKind>,
	/// Bypass the cache and force a live upstream attempt.
	pub force_refresh: bool,
	/// Cooperative cancellation, checked at the Scheduler's suspension points (§5).
	pub cancellation: Option<CancellationToken>,
}

/// Point-in-time counters and per-credential health, for observability (§6).
#[derive(Clone, Debug)]
pub struct StatsSnapshot {
	/// Total lookups completed, of any terminal status.
	pub total_lookups: u64,
	/// Lookups answered from the cache.
	pub cache_hits: u64,
	/// Lookups that missed the cache and required a coalescer/Scheduler pass.
	pub cache_misses: u64,
	/// Lookups that ended up queued for background draining.
	pub queued: u64,
	/// Lookups that ended in `Failed`.
	pub failed: u64,
	/// Credential rotations performed across all attempt loops.
	pub key_rotations: u64,
	/// Current number of live cache entries.
	pub cache_size: usize,
	/// Current queue depth.
	pub queue_depth: usize,
	/// Per-credential health snapshot.
	pub credentials: Vec<Credential>,
	/// When this Orchestrator was constructed.
	pub started_at: DateTime<Utc>,
	/// Time elapsed since construction.
	pub uptime: Duration,
	/// Mirrored `metrics`-crate samples, present when the `metrics` feature is enabled.
	#[cfg(feature = "metrics")]
	pub metrics: Vec<StatMetric>,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
	pub(crate) total_lookups: AtomicU64,
	pub(crate) cache_hits: AtomicU64,
	pub(crate) cache_misses: AtomicU64,
	pub(crate) queued: AtomicU64,
	pub(crate) failed: AtomicU64,
	pub(crate) key_rotations: AtomicU64,
}
impl Counters {
	pub(crate) fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
		#[cfg(feature = "metrics")]
		crate::metrics::record_cache_hit();
	}

	pub(crate) fn record_cache_miss(&self) {
		self.cache_misses.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_queued(&self) {
		self.queued.fetch_add(1, Ordering::Relaxed);
		#[cfg(feature = "metrics")]
		crate::metrics::record_queued();
	}

	pub(crate) fn record_key_rotation(&self) {
		self.key_rotations.fetch_add(1, Ordering::Relaxed);
		#[cfg(feature = "metrics")]
		crate::metrics::record_key_rotation();
	}

	pub(crate) fn record_lookup(&self, status: LookupStatus) {
		self.total_lookups.fetch_add(1, Ordering::Relaxed);

		if status == LookupStatus::Failed {
			self.failed.fetch_add(1, Ordering::Relaxed);
		}

		#[cfg(feature = "metrics")]
		crate::metrics::record_lookup(status_label(status));
	}
}

#[cfg(feature = "metrics")]
fn status_label(status: LookupStatus) -> &'static str {
	match status {
		LookupStatus::ServedFromCache => "served_from_cache",
		LookupStatus::ServedLive => "served_live",
		LookupStatus::QueuedRateLimited => "queued_rate_limited",
		LookupStatus::Failed => "failed",
	}
}

/// Validates an [`OrchestratorConfig`] and assembles an [`Orchestrator`].
pub struct OrchestratorBuilder {
	config: OrchestratorConfig,
}
impl OrchestratorBuilder {
	/// Start building from `config`.
	pub fn new(config: OrchestratorConfig) -> Self {
		Self { config }
	}

	/// Validate the configuration and construct the Orchestrator's sub-modules.
	pub fn build(self) -> Result<Orchestrator> {
		self.config.validate()?;

		let key_pool = Arc::new(KeyPool::new(
			self.config.credentials.clone(),
			self.config.default_cooldown,
			self.config.invalid_cooldown,
		));
		let cache = Arc::new(Cache::new(self.config.cache_ttl));
		let coalescer = Arc::new(Coalescer::new());
		let upstream = Arc::new(UpstreamClient::new(
			self.config.upstream_base_url.clone(),
			self.config.request_timeout,
			self.config.rate_limit_headers.clone(),
		)?);
		let counters = Arc::new(Counters::default());
		let scheduler = Scheduler::new(
			key_pool.clone(),
			cache.clone(),
			coalescer,
			upstream,
			self.config.max_attempts,
			self.config.backoff.clone(),
			counters.clone(),
		);

		Ok(Orchestrator {
			key_pool,
			cache,
			scheduler,
			counters,
			ui_base_url: self.config.ui_base_url.clone(),
			started_at: Utc::now(),
			start_instant: Instant::now(),
		})
	}
}

/// Concurrent reputation orchestrator: the crate's single public entry point.
///
/// Cheap to clone (`Arc`-backed sub-modules) and safe to share across tasks.
pub struct Orchestrator {
	key_pool: Arc<KeyPool>,
	cache: Arc<Cache>,
	scheduler: Scheduler,
	counters: Arc<Counters>,
	ui_base_url: Option<Url>,
	started_at: DateTime<Utc>,
	start_instant: Instant,
}
impl Orchestrator {
	/// Start a builder for fine-grained construction.
	pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
		OrchestratorBuilder::new(config)
	}

	/// Construct directly from a validated configuration.
	pub fn new(config: OrchestratorConfig) -> Result<Self> {
		OrchestratorBuilder::new(config).build()
	}

	/// Look up an indicator of compromise, detecting its kind unless `options.kind` asserts one.
	#[tracing::instrument(skip(self, raw, options))]
	pub async fn lookup(&self, raw: impl Into<String>, options: LookupOptions) -> Result<LookupResult> {
		let indicator = Indicator::parse(raw.into(), options.kind)?;

		let mut result = self
			.scheduler
			.lookup(indicator, options.force_refresh, options.cancellation.as_ref())
			.await;

		result.external_link = self.external_link(&result.indicator);
		self.counters.record_lookup(result.status);

		Ok(result)
	}

	fn external_link(&self, indicator: &Indicator) -> Option<String> {
		let base = self.ui_base_url.as_ref()?;
		let segment = match indicator.kind {
			IndicatorKind::Hash => "file",
			IndicatorKind::Ip => "ip-address",
			IndicatorKind::Domain => "domain",
			IndicatorKind::Url => "url",
		};
		let mut url = base.clone();

		url.path_segments_mut().ok()?.pop_if_empty().push(segment).push(&indicator.endpoint_segment());

		Some(url.to_string())
	}

	/// Snapshot the Orchestrator's counters, cache/queue sizes, and per-credential health.
	pub async fn stats(&self) -> StatsSnapshot {
		let credentials = self.key_pool.snapshot().await;
		let cache_size = self.cache.len().await;
		let queue_depth = self.scheduler.queue_depth().await;

		StatsSnapshot {
			total_lookups: self.counters.total_lookups.load(Ordering::Relaxed),
			cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
			cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
			queued: self.counters.queued.load(Ordering::Relaxed),
			failed: self.counters.failed.load(Ordering::Relaxed),
			key_rotations: self.counters.key_rotations.load(Ordering::Relaxed),
			cache_size,
			queue_depth,
			credentials,
			started_at: self.started_at,
			uptime: self.start_instant.elapsed(),
			#[cfg(feature = "metrics")]
			metrics: self.metric_samples(),
		}
	}

	#[cfg(feature = "metrics")]
	fn metric_samples(&self) -> Vec<StatMetric> {
		vec![
			StatMetric::new("rep_orchestrator_lookups_total", self.counters.total_lookups.load(Ordering::Relaxed) as f64),
			StatMetric::new("rep_orchestrator_cache_hits_total", self.counters.cache_hits.load(Ordering::Relaxed) as f64),
			StatMetric::new("rep_orchestrator_queued_total", self.counters.queued.load(Ordering::Relaxed) as f64),
			StatMetric::new(
				"rep_orchestrator_key_rotations_total",
				self.counters.key_rotations.load(Ordering::Relaxed) as f64,
			),
		]
	}

	/// Remove every cache entry.
	pub async fn clear_cache(&self) {
		self.cache.clear().await;
	}

	/// Manually drain one queued request, warming the cache if it succeeds. Returns whether
	/// anything was queued to drain.
	pub async fn drain_queue(&self) -> bool {
		self.scheduler.drain_once().await
	}

	/// Stop the background drainer and discard any remaining queued requests (§9: queued
	/// callers were already resolved with `QueuedRateLimited` and have nothing left to await).
	pub async fn shutdown(self) {
		self.scheduler.shutdown().await;
	}
}
