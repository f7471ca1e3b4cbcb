//! Configuration surface for the reputation orchestrator.
//!
//! Mirrors the teacher's `RetryPolicy`/`RegistryConfig` validation style:
//! plain data with a `validate()` that enforces the documented constraints.

// std
use std::collections::HashSet;
// crates.io
use http::HeaderName;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::_prelude::*;

/// Default cache entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(45 * 60);
/// Default upstream per-call timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default retry/rotation attempts per caller.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default exponential backoff base.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);
/// Default exponential backoff cap.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(30_000);
/// Default cooldown applied when a 429 carries no usable hint.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);
/// Default re-evaluation window after a credential is marked invalid.
pub const DEFAULT_INVALID_COOLDOWN: Duration = Duration::from_secs(5 * 60);
/// Inter-drain pause applied by the background drainer between queued lookups.
pub const DRAIN_PAUSE: Duration = Duration::from_millis(100);
/// Upper bound on how long the drainer sleeps while waiting on a cooldown to elapse.
pub const DRAIN_WAIT_CAP: Duration = Duration::from_secs(60);

/// Conventional rate-limit header names, overridable for upstreams with different conventions.
#[derive(Clone, Debug)]
pub struct RateLimitHeaders {
	/// Header carrying the remaining-quota count.
	pub remaining: HeaderName,
	/// Header carrying the epoch reset time.
	pub reset: HeaderName,
	/// Header carrying a `Retry-After` hint, in seconds.
	pub retry_after: HeaderName,
}
impl Default for RateLimitHeaders {
	fn default() -> Self {
		Self {
			remaining: HeaderName::from_static("x-ratelimit-remaining"),
			reset: HeaderName::from_static("x-ratelimit-reset"),
			retry_after: HeaderName::from_static("retry-after"),
		}
	}
}

/// Backoff bounds applied by the Scheduler on transient upstream failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackoffPolicy {
	/// Initial backoff delay, doubled on each attempt.
	pub base: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub cap: Duration,
}
impl Default for BackoffPolicy {
	fn default() -> Self {
		Self { base: DEFAULT_BACKOFF_BASE, cap: DEFAULT_BACKOFF_CAP }
	}
}
impl BackoffPolicy {
	/// Validate that `cap >= base` and both are non-zero.
	pub fn validate(&self) -> Result<()> {
		if self.base.is_zero() {
			return Err(Error::Validation {
				field: "backoff_base",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.cap < self.base {
			return Err(Error::Validation {
				field: "backoff_cap",
				reason: "Must be greater than or equal to backoff_base.".into(),
			});
		}

		Ok(())
	}

	/// Compute `base * 2^attempt`, capped, then apply +/-10% jitter (§4.6.e).
	pub fn compute(&self, attempt: u32) -> Duration {
		let exponent = attempt.min(32);
		let scaled = self.base.mul_f64(2f64.powi(exponent as i32));
		let bounded = scaled.min(self.cap).max(self.base);

		apply_jitter(bounded, 0.10)
	}
}

thread_local! {
	static SMALL_RNG: std::cell::RefCell<SmallRng> =
		std::cell::RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Apply +/-`fraction` jitter around `center`, never going negative.
fn apply_jitter(center: Duration, fraction: f64) -> Duration {
	if center.is_zero() || fraction <= 0.0 {
		return center;
	}

	let offset = SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();

		rng.random_range(-fraction..=fraction)
	});

	center.mul_f64((1.0 + offset).max(0.0))
}

/// Process-wide Orchestrator configuration (§6).
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
	/// Ordered, de-duplicated list of credential secrets.
	pub credentials: Vec<String>,
	/// Cache entry lifetime.
	pub cache_ttl: Duration,
	/// Upstream per-call timeout.
	pub request_timeout: Duration,
	/// Retry/rotation attempts per caller.
	pub max_attempts: u32,
	/// Exponential backoff bounds.
	pub backoff: BackoffPolicy,
	/// Fallback cooldown when a 429 carries no hints.
	pub default_cooldown: Duration,
	/// Re-evaluation window after a credential is marked invalid.
	pub invalid_cooldown: Duration,
	/// Base URL of the upstream reputation service.
	pub upstream_base_url: Url,
	/// Configurable rate-limit header names.
	pub rate_limit_headers: RateLimitHeaders,
	/// Optional base URL of a human-facing UI for the same upstream, used to populate
	/// `LookupResult::external_link`. `None` leaves the field unset.
	pub ui_base_url: Option<Url>,
}
impl OrchestratorConfig {
	/// Construct configuration from a required, non-empty credential list and upstream base URL.
	pub fn new(
		credentials: impl IntoIterator<Item = impl Into<String>>,
		upstream_base_url: impl AsRef<str>,
	) -> Result<Self> {
		let credentials = dedup_credentials(credentials);
		let upstream_base_url = Url::parse(upstream_base_url.as_ref())?;

		let config = Self {
			credentials,
			cache_ttl: DEFAULT_CACHE_TTL,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			max_attempts: DEFAULT_MAX_ATTEMPTS,
			backoff: BackoffPolicy::default(),
			default_cooldown: DEFAULT_COOLDOWN,
			invalid_cooldown: DEFAULT_INVALID_COOLDOWN,
			upstream_base_url,
			rate_limit_headers: RateLimitHeaders::default(),
			ui_base_url: None,
		};

		config.validate()?;

		Ok(config)
	}

	/// Validate the configuration invariants documented in §6.
	pub fn validate(&self) -> Result<()> {
		if self.credentials.is_empty() {
			return Err(Error::Validation {
				field: "credentials",
				reason: "At least one credential is required.".into(),
			});
		}
		if self.max_attempts == 0 {
			return Err(Error::Validation {
				field: "max_attempts",
				reason: "Must be at least 1.".into(),
			});
		}
		if self.request_timeout.is_zero() {
			return Err(Error::Validation {
				field: "request_timeout",
				reason: "Must be greater than zero.".into(),
			});
		}

		self.backoff.validate()?;

		Ok(())
	}
}

/// Accept credentials as one comma-joined string or several separate values; de-duplicate.
pub fn dedup_credentials(credentials: impl IntoIterator<Item = impl Into<String>>) -> Vec<String> {
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for raw in credentials {
		for part in raw.into().split(',') {
			let trimmed = part.trim();

			if !trimmed.is_empty() && seen.insert(trimmed.to_string()) {
				out.push(trimmed.to_string());
			}
		}
	}

	out
}
