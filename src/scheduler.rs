//! Scheduler (§4.6): the per-request attempt loop, the FIFO queue, and the
//! lazily-spawned background drainer.
//!
//! Grounded in the teacher's `cache/manager.rs` `refresh_blocking`/
//! `schedule_background_refresh` pair: a single-flight guard wrapping the
//! network call, and a boolean-under-mutex deciding whether a background
//! task needs spawning. Generalized here from "one refresh per provider" to
//! "one drainer per Orchestrator, shared FIFO queue," and from a fire-and-
//! forget `tokio::spawn` to one that can be told to stop via
//! `tokio_util::sync::CancellationToken`.

// std
use std::collections::VecDeque;
// crates.io
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	cache::{Cache, Summary},
	coalescer::{Attachment, Coalescer},
	config::{BackoffPolicy, DRAIN_PAUSE, DRAIN_WAIT_CAP},
	indicator::Indicator,
	keypool::KeyPool,
	orchestrator::{Counters, LookupResult},
	upstream::{Outcome, UpstreamClient},
};

struct QueuedRequest {
	indicator: Indicator,
	/// The original caller's cancellation handle, if any. Checked on every drain-scan (§4.6) so a
	/// cancelled request is dropped instead of spending an attempt warming the cache for it.
	cancellation: Option<CancellationToken>,
}

#[derive(Default)]
struct QueueState {
	items: VecDeque<QueuedRequest>,
	drainer_running: bool,
}

/// Pop the next request worth draining, dropping any cancelled entries encountered along the way
/// (§4.6: "a cancelled queued request is removed on next drain-scan").
fn pop_next_runnable(state: &mut QueueState) -> Option<QueuedRequest> {
	while let Some(front) = state.items.front() {
		if front.cancellation.as_ref().is_some_and(CancellationToken::is_cancelled) {
			state.items.pop_front();

			continue;
		}

		break;
	}

	state.items.pop_front()
}

/// Drives lookups through the Key Pool and Upstream Adapter, queueing when no credential is
/// usable and draining the queue in the background as credentials recover.
#[derive(Clone)]
pub struct Scheduler {
	key_pool: Arc<KeyPool>,
	cache: Arc<Cache>,
	coalescer: Arc<Coalescer>,
	upstream: Arc<UpstreamClient>,
	max_attempts: u32,
	backoff: BackoffPolicy,
	queue: Arc<Mutex<QueueState>>,
	shutdown: CancellationToken,
	counters: Arc<Counters>,
}
impl Scheduler {
	/// Wire a scheduler against its collaborating sub-modules.
	pub fn new(
		key_pool: Arc<KeyPool>,
		cache: Arc<Cache>,
		coalescer: Arc<Coalescer>,
		upstream: Arc<UpstreamClient>,
		max_attempts: u32,
		backoff: BackoffPolicy,
		counters: Arc<Counters>,
	) -> Self {
		Self {
			key_pool,
			cache,
			coalescer,
			upstream,
			max_attempts,
			backoff,
			queue: Arc::new(Mutex::new(QueueState::default())),
			shutdown: CancellationToken::new(),
			counters,
		}
	}

	/// Run the full lookup flow (§4.6 steps 1-5) for `indicator`.
	#[tracing::instrument(skip(self, cancellation), fields(cache_key = %indicator.cache_key()))]
	pub async fn lookup(
		&self,
		indicator: Indicator,
		force_refresh: bool,
		cancellation: Option<&CancellationToken>,
	) -> LookupResult {
		let key = indicator.cache_key();

		if !force_refresh
			&& let Some(summary) = self.cache.get(&key).await
		{
			self.counters.record_cache_hit();

			return LookupResult::served_from_cache(indicator, summary);
		}

		self.counters.record_cache_miss();

		let mut rx = match self.coalescer.attach_or_register(&key).await {
			Attachment::Follower(rx) => rx,
			Attachment::Leader => {
				let result = self.attempt_loop(&indicator, cancellation).await;

				self.coalescer.resolve(&key, result.clone()).await;

				return result;
			},
		};

		match rx.recv().await {
			Ok(result) => result,
			Err(_) => LookupResult::failed(indicator, "coalesced lookup was dropped before resolving"),
		}
	}

	async fn attempt_loop(
		&self,
		indicator: &Indicator,
		cancellation: Option<&CancellationToken>,
	) -> LookupResult {
		let key = indicator.cache_key();
		let mut last_error = String::from("no attempt was made");

		for attempt in 0..self.max_attempts {
			if cancellation.is_some_and(CancellationToken::is_cancelled) {
				return LookupResult::failed(indicator.clone(), "lookup was cancelled");
			}

			let Some(credential) = self.key_pool.pick().await else {
				if self.key_pool.all_unusable().await {
					let reason = format!("all attempts failed: every credential is unusable ({last_error})");

					return LookupResult::failed(
						indicator.clone(),
						Error::AllKeysUnusable { reason }.to_string(),
					);
				}

				return self.enqueue(indicator.clone(), cancellation.cloned()).await;
			};

			match self.upstream.fetch(indicator, &credential).await {
				Outcome::Hit { summary, quota } => {
					self.key_pool.observe_headers(credential.id(), quota.remaining, quota.reset_at).await;
					self.cache.put(key, summary).await;

					return LookupResult::served_live(indicator.clone(), summary, credential.id())
						.with_rate_limit(quota.remaining, quota.reset_at);
				},
				Outcome::Empty => {
					return LookupResult::served_live(indicator.clone(), Summary::default(), credential.id());
				},
				Outcome::Invalid { reason } => {
					self.key_pool.mark_invalid(credential.id(), reason.clone()).await;
					self.counters.record_key_rotation();
					last_error = reason;
				},
				Outcome::RateLimited { retry_after, reset_header } => {
					self.key_pool.mark_rate_limited(credential.id(), retry_after, reset_header).await;
					self.counters.record_key_rotation();
					last_error = "credential was rate-limited".into();
				},
				Outcome::Transient { reason } => {
					last_error = reason;
					tokio::time::sleep(self.backoff.compute(attempt)).await;
				},
				Outcome::Failed { reason } => {
					return LookupResult::failed(indicator.clone(), reason);
				},
			}
		}

		if self.key_pool.all_unusable().await {
			let reason = format!("all attempts failed: every credential is unusable ({last_error})");

			return LookupResult::failed(indicator.clone(), Error::AllKeysUnusable { reason }.to_string());
		}

		LookupResult::failed(indicator.clone(), Error::UpstreamFailure { reason: last_error }.to_string())
	}

	async fn enqueue(&self, indicator: Indicator, cancellation: Option<CancellationToken>) -> LookupResult {
		let eta = self.key_pool.earliest_reset_time().await;

		let should_spawn = {
			let mut state = self.queue.lock().await;

			state.items.push_back(QueuedRequest { indicator: indicator.clone(), cancellation });
			self.counters.record_queued();

			if state.drainer_running {
				false
			} else {
				state.drainer_running = true;

				true
			}
		};

		if should_spawn {
			self.spawn_drainer();
		}

		LookupResult::queued(indicator, eta)
	}

	fn spawn_drainer(&self) {
		let scheduler = self.clone();

		tokio::spawn(async move { scheduler.drain_loop().await });
	}

	async fn drain_loop(&self) {
		loop {
			if self.shutdown.is_cancelled() {
				break;
			}

			let now = Utc::now();

			if let Some(eta) = self.key_pool.earliest_reset_time().await
				&& eta > now
			{
				let wait = (eta - now).to_std().unwrap_or(Duration::ZERO).min(DRAIN_WAIT_CAP);

				tokio::select! {
					() = tokio::time::sleep(wait) => {},
					() = self.shutdown.cancelled() => break,
				}

				continue;
			}

			let next = {
				let mut state = self.queue.lock().await;

				pop_next_runnable(&mut state)
			};

			let Some(queued) = next else {
				let mut state = self.queue.lock().await;

				if state.items.is_empty() {
					state.drainer_running = false;

					break;
				}

				continue;
			};

			self.drain_one(queued.indicator).await;

			tokio::select! {
				() = tokio::time::sleep(DRAIN_PAUSE) => {},
				() = self.shutdown.cancelled() => break,
			}
		}
	}

	/// Process one queued request for cache-warming purposes (§9: the result is discarded;
	/// only the cache write, if any, is observable).
	async fn drain_one(&self, indicator: Indicator) {
		let key = indicator.cache_key();

		if self.cache.get(&key).await.is_some() {
			return;
		}

		let _ = self.attempt_loop(&indicator, None).await;
	}

	/// Manually advance the drainer by one queued request, for hosts that cannot rely on a
	/// persistent background task (§6's `drainQueue`). Returns whether anything was drained.
	pub async fn drain_once(&self) -> bool {
		let next = {
			let mut state = self.queue.lock().await;

			pop_next_runnable(&mut state)
		};

		let Some(queued) = next else { return false };

		self.drain_one(queued.indicator).await;

		true
	}

	/// Current queue depth.
	pub async fn queue_depth(&self) -> usize {
		self.queue.lock().await.items.len()
	}

	/// Stop the drainer and discard any queued requests. Callers attached to those requests
	/// already received `QueuedRateLimited`; queueing exists only to warm the cache for them.
	pub async fn shutdown(&self) {
		self.shutdown.cancel();

		let mut state = self.queue.lock().await;

		state.items.clear();
	}
}

#[cfg(test)]
mod tests {
	use url::Url;
	use wiremock::{
		Mock, MockServer, ResponseTemplate,
		matchers::{method, path},
	};

	use super::*;
	use crate::{config::RateLimitHeaders, orchestrator::LookupStatus};

	fn scheduler(upstream: UpstreamClient, credentials: Vec<String>) -> Scheduler {
		Scheduler::new(
			Arc::new(KeyPool::new(credentials, Duration::from_secs(60), Duration::from_secs(300))),
			Arc::new(Cache::new(Duration::from_secs(60))),
			Arc::new(Coalescer::new()),
			Arc::new(upstream),
			3,
			BackoffPolicy { base: Duration::from_millis(1), cap: Duration::from_millis(5) },
			Arc::new(Counters::default()),
		)
	}

	async fn upstream_against(server: &MockServer) -> UpstreamClient {
		UpstreamClient::new(Url::parse(&server.uri()).unwrap(), Duration::from_secs(5), RateLimitHeaders::default())
			.unwrap()
	}

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
	async fn cold_then_warm_lookup() {
		let server = MockServer::start().await;
		let hash = "e".repeat(64);

		Mock::given(method("GET"))
			.and(path(format!("/files/{hash}")))
			.respond_with(ResponseTemplate::new(200).set_body_json(stats_body(5, 2, 50, 3)))
			.expect(1)
			.mount(&server)
			.await;

		let scheduler = scheduler(upstream_against(&server).await, vec!["key-one".into()]);
		let indicator = Indicator::parse(hash, None).unwrap();

		let first = scheduler.lookup(indicator.clone(), false, None).await;

		assert_eq!(first.status, LookupStatus::ServedLive);
		assert_eq!(first.summary.unwrap().total_scans(), 60);

		let second = scheduler.lookup(indicator, false, None).await;

		assert_eq!(second.status, LookupStatus::ServedFromCache);
	}

	#[tokio::test]
	async fn rotates_key_on_401_then_succeeds() {
		let server = MockServer::start().await;
		let ip = "203.0.113.9";

		Mock::given(method("GET"))
			.and(path(format!("/ip_addresses/{ip}")))
			.respond_with(ResponseTemplate::new(401))
			.up_to_n_times(1)
			.mount(&server)
			.await;
		Mock::given(method("GET"))
			.and(path(format!("/ip_addresses/{ip}")))
			.respond_with(ResponseTemplate::new(200).set_body_json(stats_body(1, 0, 60, 2)))
			.mount(&server)
			.await;

		let scheduler = scheduler(upstream_against(&server).await, vec!["key-one".into(), "key-two".into()]);
		let indicator = Indicator::parse(ip, None).unwrap();

		let result = scheduler.lookup(indicator, false, None).await;

		assert_eq!(result.status, LookupStatus::ServedLive);
		assert_eq!(scheduler.counters.key_rotations.load(std::sync::atomic::Ordering::Relaxed), 1);
	}

	#[tokio::test]
	async fn queues_on_rate_limit_with_single_key() {
		let server = MockServer::start().await;
		let domain = "evil.example.org";

		Mock::given(method("GET"))
			.and(path(format!("/domains/{domain}")))
			.respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
			.mount(&server)
			.await;

		let scheduler = scheduler(upstream_against(&server).await, vec!["only-key".into()]);
		let indicator = Indicator::parse(domain, None).unwrap();

		let result = scheduler.lookup(indicator, false, None).await;

		assert_eq!(result.status, LookupStatus::QueuedRateLimited);
		assert!(result.eta.is_some());
		assert_eq!(scheduler.queue_depth().await, 1);

		scheduler.shutdown().await;
	}

	#[tokio::test]
	async fn cancelled_queued_request_is_dropped_on_next_drain_scan() {
		let server = MockServer::start().await;
		let domain = "cancelled.example.org";

		Mock::given(method("GET"))
			.and(path(format!("/domains/{domain}")))
			.respond_with(ResponseTemplate::new(429).insert_header("retry-after", "300"))
			.mount(&server)
			.await;

		let scheduler = scheduler(upstream_against(&server).await, vec!["only-key".into()]);
		let indicator = Indicator::parse(domain, None).unwrap();
		let token = CancellationToken::new();

		let result = scheduler.lookup(indicator, false, Some(&token)).await;

		assert_eq!(result.status, LookupStatus::QueuedRateLimited);
		assert_eq!(scheduler.queue_depth().await, 1);

		token.cancel();

		assert!(!scheduler.drain_once().await);
		assert_eq!(scheduler.queue_depth().await, 0);
	}

	#[tokio::test]
	async fn all_keys_invalid_fails() {
		let server = MockServer::start().await;
		let domain = "bad.example.org";

		Mock::given(method("GET"))
			.and(path(format!("/domains/{domain}")))
			.respond_with(ResponseTemplate::new(403))
			.mount(&server)
			.await;

		let scheduler =
			scheduler(upstream_against(&server).await, vec!["a".into(), "b".into(), "c".into()]);
		let indicator = Indicator::parse(domain, None).unwrap();

		let result = scheduler.lookup(indicator, false, None).await;

		assert_eq!(result.status, LookupStatus::Failed);
		assert!(result.error.unwrap().contains("all attempts failed"));
	}

	#[tokio::test]
	async fn concurrent_identical_lookups_issue_one_upstream_call() {
		let server = MockServer::start().await;
		let domain = "coalesce.example.org";

		Mock::given(method("GET"))
			.and(path(format!("/domains/{domain}")))
			.respond_with(ResponseTemplate::new(200).set_body_json(stats_body(0, 0, 1, 0)).set_delay(
				Duration::from_millis(100),
			))
			.expect(1)
			.mount(&server)
			.await;

		let scheduler = Arc::new(scheduler(upstream_against(&server).await, vec!["only-key".into()]));

		let mut handles = Vec::new();

		for _ in 0..3 {
			let scheduler = scheduler.clone();
			let indicator = Indicator::parse(domain, None).unwrap();

			handles.push(tokio::spawn(async move { scheduler.lookup(indicator, false, None).await }));
		}

		let mut results = Vec::new();

		for handle in handles {
			results.push(handle.await.unwrap());
		}

		assert!(results.iter().all(|r| r.status == LookupStatus::ServedLive));
	}
}
