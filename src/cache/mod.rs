//! TTL-bounded result cache (§4.3).
//!
//! A single mutex over a plain map, following the teacher's discipline of
//! keeping every cache operation short-lived under the lock and returning
//! summaries by value (`cache/state.rs`'s immutable-snapshot style, flattened
//! here since the Orchestrator's cache has no ETag/refresh state machine to
//! model — just expiry).

// std
use std::collections::HashMap;
// crates.io
use rand::Rng;
use tokio::sync::Mutex;
// self
use crate::_prelude::*;

/// Probability that a `put` also sweeps expired entries (bounded work per call).
const SWEEP_PROBABILITY: f64 = 0.02;
/// Upper bound on entries inspected during an opportunistic sweep.
const SWEEP_BUDGET: usize = 64;

/// Condensed verdict returned by the upstream reputation service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Summary {
	/// Count of engines flagging the indicator malicious.
	pub malicious: u32,
	/// Count of engines flagging the indicator suspicious.
	pub suspicious: u32,
	/// Count of engines flagging the indicator clean.
	pub clean: u32,
	/// Count of engines that did not analyze the indicator.
	pub undetected: u32,
}
impl Summary {
	/// Total scans, defined as the sum of the four counters.
	pub fn total_scans(&self) -> u32 {
		self.malicious + self.suspicious + self.clean + self.undetected
	}
}

struct Entry {
	summary: Summary,
	expires_at: Instant,
}

/// A mapping from cache key to entry, with a configurable TTL.
pub struct Cache {
	inner: Mutex<HashMap<String, Entry>>,
	ttl: Duration,
}
impl Cache {
	/// Build an empty cache with the given entry lifetime.
	pub fn new(ttl: Duration) -> Self {
		Self { inner: Mutex::new(HashMap::new()), ttl }
	}

	/// Look up a key, removing and returning `None` if the entry has expired.
	pub async fn get(&self, key: &str) -> Option<Summary> {
		let now = Instant::now();
		let mut map = self.inner.lock().await;

		match map.get(key) {
			Some(entry) if entry.expires_at > now => Some(entry.summary),
			Some(_) => {
				map.remove(key);

				None
			},
			None => None,
		}
	}

	/// Store a summary with `expires_at = now + ttl`, opportunistically sweeping expired entries.
	pub async fn put(&self, key: impl Into<String>, summary: Summary) {
		let now = Instant::now();
		let expires_at = now + self.ttl;
		let mut map = self.inner.lock().await;

		map.insert(key.into(), Entry { summary, expires_at });

		if rand::rng().random_bool(SWEEP_PROBABILITY) {
			sweep(&mut map, now);
		}
	}

	/// Remove every entry.
	pub async fn clear(&self) {
		self.inner.lock().await.clear();
	}

	/// Current number of entries, including any not yet opportunistically swept.
	pub async fn len(&self) -> usize {
		self.inner.lock().await.len()
	}
}

fn sweep(map: &mut HashMap<String, Entry>, now: Instant) {
	let expired: Vec<String> = map
		.iter()
		.take(SWEEP_BUDGET)
		.filter(|(_, entry)| entry.expires_at <= now)
		.map(|(key, _)| key.clone())
		.collect();

	for key in expired {
		map.remove(&key);
	}
}
