//! Credential health tracking and selection (the Key Pool, §4.2).
//!
//! Holds the credential list and mutable state behind a single mutex,
//! following the teacher's "one lock over the whole collection, never held
//! across a network call" discipline (`registry.rs`'s `RwLock<RegistryState>`,
//! simplified here to a plain `Mutex` since reads mutate promotion state too).

// std
use std::fmt;
// crates.io
use tokio::sync::Mutex;
// self
use crate::_prelude::*;

/// Lifecycle status of a credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialStatus {
	/// Usable now.
	Ok,
	/// Rate-limited; ineligible until `reset_at` elapses.
	Cooldown,
	/// Rejected by the upstream (401/403); ineligible until the re-evaluation window elapses.
	Invalid,
}
impl fmt::Display for CredentialStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Ok => "ok",
			Self::Cooldown => "cooldown",
			Self::Invalid => "invalid",
		};

		write!(f, "{s}")
	}
}

/// A single upstream credential and its observed health.
///
/// The `secret` is crate-private: callers outside this crate receive
/// `Credential` values (e.g. in [`crate::StatsSnapshot`]) but can never read
/// the secret field, only `id`.
#[derive(Clone)]
pub struct Credential {
	id: String,
	pub(crate) secret: String,
	/// Current lifecycle status.
	pub status: CredentialStatus,
	/// Remaining quota, when known from the most recent response headers.
	pub remaining: Option<i64>,
	/// Reset time: quota window reset when `Ok`, cooldown/re-evaluation deadline otherwise.
	pub reset_at: Option<DateTime<Utc>>,
	/// Last error observed from this credential, if any.
	pub last_error: Option<String>,
}
impl Credential {
	fn new(secret: String) -> Self {
		let id = secret.chars().take(8).collect();

		Self { id, secret, status: CredentialStatus::Ok, remaining: None, reset_at: None, last_error: None }
	}

	/// The first 8 characters of the secret — the only form ever logged.
	pub fn id(&self) -> &str {
		&self.id
	}
}
impl fmt::Debug for Credential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credential")
			.field("id", &self.id)
			.field("status", &self.status)
			.field("remaining", &self.remaining)
			.field("reset_at", &self.reset_at)
			.finish_non_exhaustive()
	}
}

struct KeyPoolState {
	credentials: Vec<Credential>,
	round_robin: usize,
}

/// Tracks health, remaining quota, and reset time per credential; selects the best available one.
#[derive(Debug)]
pub struct KeyPool {
	inner: Mutex<KeyPoolState>,
	default_cooldown: Duration,
	invalid_cooldown: Duration,
}
impl fmt::Debug for KeyPoolState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("KeyPoolState").field("credentials", &self.credentials).finish()
	}
}
impl KeyPool {
	/// Build a pool from de-duplicated secrets and the configured cooldown windows.
	pub fn new(secrets: Vec<String>, default_cooldown: Duration, invalid_cooldown: Duration) -> Self {
		let credentials = secrets.into_iter().map(Credential::new).collect();

		Self {
			inner: Mutex::new(KeyPoolState { credentials, round_robin: 0 }),
			default_cooldown,
			invalid_cooldown,
		}
	}

	/// Select the best currently-usable credential, or `None` if every credential is ineligible.
	///
	/// Selection order: among `Ok` credentials, prefer highest `remaining`; if unknown for all,
	/// round-robin; ties broken by stable id (insertion) order. A `Cooldown` credential whose
	/// window has elapsed is auto-promoted to `Ok` before selection. An `Invalid` credential past
	/// its re-evaluation window is returned once, with its prior status intact, only when no `Ok`
	/// candidate exists.
	pub async fn pick(&self) -> Option<Credential> {
		let now = Utc::now();
		let mut state = self.inner.lock().await;

		for cred in state.credentials.iter_mut() {
			if cred.status == CredentialStatus::Cooldown
				&& cred.reset_at.is_some_and(|reset_at| reset_at <= now)
			{
				cred.status = CredentialStatus::Ok;
				cred.reset_at = None;
			}
		}

		let ok_indices: Vec<usize> = state
			.credentials
			.iter()
			.enumerate()
			.filter(|(_, c)| c.status == CredentialStatus::Ok)
			.map(|(i, _)| i)
			.collect();

		if !ok_indices.is_empty() {
			let all_known = ok_indices.iter().all(|&i| state.credentials[i].remaining.is_some());
			let chosen = if all_known {
				let max_remaining =
					ok_indices.iter().map(|&i| state.credentials[i].remaining.unwrap()).max().unwrap();

				*ok_indices
					.iter()
					.find(|&&i| state.credentials[i].remaining == Some(max_remaining))
					.unwrap()
			} else {
				let pick_at = state.round_robin % ok_indices.len();

				state.round_robin = state.round_robin.wrapping_add(1);
				ok_indices[pick_at]
			};

			return Some(state.credentials[chosen].clone());
		}

		state
			.credentials
			.iter()
			.find(|c| {
				c.status == CredentialStatus::Invalid
					&& c.reset_at.is_some_and(|reset_at| reset_at <= now)
			})
			.cloned()
	}

	/// Update `remaining`/`reset_at` from a successful response, clearing `Cooldown` only if the
	/// reported quota is positive (a `200` reporting `remaining == 0` leaves the credential
	/// exhausted for this window).
	pub async fn observe_headers(
		&self,
		id: &str,
		remaining: Option<i64>,
		reset_at: Option<DateTime<Utc>>,
	) {
		let mut state = self.inner.lock().await;

		if let Some(cred) = find_mut(&mut state, id) {
			if remaining.is_none_or(|value| value > 0) {
				cred.status = CredentialStatus::Ok;
				cred.last_error = None;
			}

			cred.remaining = remaining;
			cred.reset_at = reset_at;
		}
	}

	/// Place the credential into cooldown following a 429 response.
	///
	/// A present-but-zero `retry_after` (`Retry-After: 0`) is treated as no hint at all (§8) and
	/// falls through to `reset_header`, then the default cooldown, rather than being honored as
	/// an immediate reset.
	pub async fn mark_rate_limited(&self, id: &str, retry_after: Option<Duration>, reset_header: Option<DateTime<Utc>>) {
		let mut state = self.inner.lock().await;
		let default_cooldown = self.default_cooldown;
		let retry_after = retry_after.filter(|delay| !delay.is_zero());

		if let Some(cred) = find_mut(&mut state, id) {
			let now = Utc::now();
			let reset_at = retry_after
				.map(|delay| now + chrono_delta(delay))
				.or(reset_header)
				.unwrap_or(now + chrono_delta(default_cooldown));

			cred.status = CredentialStatus::Cooldown;
			cred.remaining = Some(0);
			cred.reset_at = Some(reset_at);
		}
	}

	/// Mark the credential invalid following a 401/403 response.
	pub async fn mark_invalid(&self, id: &str, reason: String) {
		let mut state = self.inner.lock().await;
		let invalid_cooldown = self.invalid_cooldown;

		if let Some(cred) = find_mut(&mut state, id) {
			cred.status = CredentialStatus::Invalid;
			cred.reset_at = Some(Utc::now() + chrono_delta(invalid_cooldown));
			cred.last_error = Some(reason);
		}
	}

	/// The minimum `reset_at` among non-`Ok` credentials, used to compute an ETA for queued work.
	pub async fn earliest_reset_time(&self) -> Option<DateTime<Utc>> {
		let state = self.inner.lock().await;

		state
			.credentials
			.iter()
			.filter(|c| c.status != CredentialStatus::Ok)
			.filter_map(|c| c.reset_at)
			.min()
	}

	/// Whether every credential is `Invalid` with no pending re-evaluation.
	pub async fn all_unusable(&self) -> bool {
		let now = Utc::now();
		let state = self.inner.lock().await;

		state.credentials.iter().all(|c| {
			c.status == CredentialStatus::Invalid && c.reset_at.is_none_or(|reset_at| reset_at > now)
		})
	}

	/// Snapshot of every credential's public state, for [`crate::StatsSnapshot`].
	pub async fn snapshot(&self) -> Vec<Credential> {
		self.inner.lock().await.credentials.clone()
	}
}

fn find_mut<'a>(state: &'a mut KeyPoolState, id: &str) -> Option<&'a mut Credential> {
	state.credentials.iter_mut().find(|c| c.id == id)
}

fn chrono_delta(duration: Duration) -> TimeDelta {
	TimeDelta::from_std(duration).unwrap_or(TimeDelta::zero())
}
