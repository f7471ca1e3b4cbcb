//! Request coalescing (§4.4): share a single in-flight lookup among
//! concurrent duplicate requests.
//!
//! Grounded in the teacher's `single_flight: Arc<Mutex<()>>` guard
//! (`cache/manager.rs`), generalized here from "serialize refresh work" to
//! "fan the same result out to every waiter" via a broadcast channel, since
//! the Orchestrator's coalescing guarantee (§8) requires every attached
//! caller to receive the identical [`crate::LookupResult`].

// std
use std::collections::HashMap;
// crates.io
use tokio::sync::{Mutex, broadcast};
// self
use crate::LookupResult;

const CHANNEL_CAPACITY: usize = 1;

/// Result of [`Coalescer::attach_or_register`]: either the caller is now responsible for
/// running the lookup and calling [`Coalescer::resolve`] (`Leader`), or an in-flight lookup was
/// already registered and the caller should await its result instead (`Follower`).
pub enum Attachment {
	/// No in-flight lookup existed for the key; the caller registered one and owns it.
	Leader,
	/// An in-flight lookup already existed; subscribed to receive its result.
	Follower(broadcast::Receiver<LookupResult>),
}

/// Tracks in-flight lookups, keyed by cache key.
pub struct Coalescer {
	inflight: Mutex<HashMap<String, broadcast::Sender<LookupResult>>>,
}
impl Default for Coalescer {
	fn default() -> Self {
		Self::new()
	}
}
impl Coalescer {
	/// Build an empty coalescer.
	pub fn new() -> Self {
		Self { inflight: Mutex::new(HashMap::new()) }
	}

	/// Attach to an in-flight lookup for `key`, or register one, as a single atomic operation
	/// under one lock acquisition. Guarantees at most one upstream call per cache key is ever in
	/// flight (§8): two concurrent callers for the same key can never both become `Leader`.
	pub async fn attach_or_register(&self, key: &str) -> Attachment {
		let mut inflight = self.inflight.lock().await;

		if let Some(tx) = inflight.get(key) {
			return Attachment::Follower(tx.subscribe());
		}

		let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);

		inflight.insert(key.to_string(), tx);

		Attachment::Leader
	}

	/// Resolve the in-flight lookup for `key`, broadcasting the result to every attached waiter
	/// and removing the registration.
	pub async fn resolve(&self, key: &str, result: LookupResult) {
		let mut inflight = self.inflight.lock().await;

		if let Some(tx) = inflight.remove(key) {
			// No receivers (e.g. all callers cancelled) is not an error; the result is simply
			// dropped.
			let _ = tx.send(result);
		}
	}
}
