//! Indicator detection and canonicalization (the Normalizer).
//!
//! Pure, synchronous functions: given a raw string and an optional
//! caller-supplied kind, produce a canonical [`Indicator`] used for cache
//! keying and upstream URL construction.

// std
use std::fmt;
// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::{Error, Result};

/// Detected or caller-asserted kind of an indicator of compromise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
	/// File hash (MD5/SHA1/SHA256/SHA512), canonicalized lowercase.
	Hash,
	/// URL, canonicalized with a lowercased host.
	Url,
	/// IPv4 address, preserved verbatim.
	Ip,
	/// Domain name, canonicalized lowercase.
	Domain,
}
impl fmt::Display for IndicatorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Hash => "hash",
			Self::Url => "url",
			Self::Ip => "ip",
			Self::Domain => "domain",
		};

		write!(f, "{s}")
	}
}

/// A normalized indicator of compromise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Indicator {
	/// The raw string as supplied by the caller.
	pub raw: String,
	/// Detected or asserted kind.
	pub kind: IndicatorKind,
	/// Canonical form used for cache keying and equality.
	pub canonical: String,
}
impl Indicator {
	/// Detect and canonicalize a raw indicator, optionally constrained to a caller-supplied kind.
	///
	/// Fails only when `requested` conflicts with an unambiguous detection, e.g. asking for
	/// `Ip` on a string that is unambiguously a 64-hex hash.
	pub fn parse(raw: impl Into<String>, requested: Option<IndicatorKind>) -> Result<Self> {
		let raw = raw.into();
		let detected = detect_kind(&raw);

		let kind = match requested {
			None => detected,
			Some(requested) if requested == detected => requested,
			Some(requested) => {
				return Err(Error::InvalidIndicator {
					reason: format!(
						"caller asserted kind {requested} but detection found {detected} for '{raw}'"
					),
				});
			},
		};
		let canonical = canonicalize(&raw, kind)?;

		Ok(Self { raw, kind, canonical })
	}

	/// Cache key used by [`crate::cache::Cache`]: `"<kind>:<canonical>"`.
	pub fn cache_key(&self) -> String {
		format!("{}:{}", self.kind, self.canonical)
	}

	/// Build the upstream endpoint path segment per §4.5 of the orchestrator design.
	pub fn endpoint_segment(&self) -> String {
		match self.kind {
			IndicatorKind::Hash => self.canonical.clone(),
			IndicatorKind::Ip => self.canonical.clone(),
			IndicatorKind::Domain => self.canonical.clone(),
			IndicatorKind::Url => URL_SAFE_NO_PAD.encode(self.canonical.as_bytes()),
		}
	}
}

/// Detection tie-break order: hex-length match (Hash) > url-scheme prefix (Url) > ipv4 pattern
/// (Ip) > fallback (Domain).
fn detect_kind(raw: &str) -> IndicatorKind {
	let trimmed = raw.trim();

	if is_hex_hash(trimmed) {
		IndicatorKind::Hash
	} else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
		IndicatorKind::Url
	} else if is_ipv4(trimmed) {
		IndicatorKind::Ip
	} else {
		IndicatorKind::Domain
	}
}

const HASH_LENGTHS: [usize; 4] = [32, 40, 64, 128];

fn is_hex_hash(value: &str) -> bool {
	HASH_LENGTHS.contains(&value.len()) && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_ipv4(value: &str) -> bool {
	let parts: Vec<&str> = value.split('.').collect();

	parts.len() == 4
		&& parts.iter().all(|part| {
			!part.is_empty() && part.chars().all(|c| c.is_ascii_digit()) && part.parse::<u16>()
				.is_ok_and(|n| n <= 255)
		})
}

fn canonicalize(raw: &str, kind: IndicatorKind) -> Result<String> {
	let trimmed = raw.trim();

	match kind {
		IndicatorKind::Hash | IndicatorKind::Domain => Ok(trimmed.to_ascii_lowercase()),
		IndicatorKind::Ip => Ok(trimmed.to_string()),
		IndicatorKind::Url => {
			let mut url = Url::parse(trimmed)?;

			if let Some(host) = url.host_str() {
				let lowered = host.to_ascii_lowercase();

				url.set_host(Some(&lowered))?;
			}

			Ok(url.to_string())
		},
	}
}
