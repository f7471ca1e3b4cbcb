//! HTTP client integration with the upstream reputation service.

// std
use std::time::Duration as StdDuration;
// crates.io
use http::{HeaderMap, StatusCode};
use reqwest::{Client, redirect};
use serde::Deserialize;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::Summary,
	config::RateLimitHeaders,
	indicator::{Indicator, IndicatorKind},
	keypool::Credential,
};

const CREDENTIAL_HEADER: &str = "x-apikey";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Rate-limit quota observed on a successful (200) response, if the upstream sent it.
#[derive(Clone, Copy, Debug, Default)]
pub struct QuotaObservation {
	/// Remaining requests in the current window.
	pub remaining: Option<i64>,
	/// Epoch time the window resets, per the upstream's reset header.
	pub reset_at: Option<DateTime<Utc>>,
}

/// Result of a single upstream attempt, already classified per §4.5's status table.
#[derive(Debug)]
pub enum Outcome {
	/// 200 with a parsed body.
	Hit { summary: Summary, quota: QuotaObservation },
	/// 404: indicator unknown to the upstream. Not cached; does not affect credential health.
	Empty,
	/// 429: credential exhausted its quota.
	RateLimited { retry_after: Option<Duration>, reset_header: Option<DateTime<Utc>> },
	/// 401/403: credential rejected outright.
	Invalid { reason: String },
	/// 5xx, network error, timeout, or an unparseable body.
	Transient { reason: String },
	/// Any other 4xx: non-retryable.
	Failed { reason: String },
}

#[derive(Deserialize)]
struct ResponseBody {
	data: ResponseData,
}
#[derive(Deserialize)]
struct ResponseData {
	attributes: Attributes,
}
#[derive(Deserialize)]
struct Attributes {
	last_analysis_stats: Stats,
}
#[derive(Deserialize)]
struct Stats {
	#[serde(default)]
	malicious: u32,
	#[serde(default)]
	suspicious: u32,
	#[serde(default)]
	harmless: u32,
	#[serde(default)]
	undetected: u32,
}

/// Builds endpoint URLs, issues GET requests, and classifies the response.
#[derive(Debug)]
pub struct UpstreamClient {
	http: Client,
	base_url: Url,
	request_timeout: Duration,
	rate_limit_headers: RateLimitHeaders,
}
impl UpstreamClient {
	/// Build a client against `base_url`, following the teacher's no-redirect, rustls-backed
	/// `reqwest::Client` configuration.
	pub fn new(
		base_url: Url,
		request_timeout: Duration,
		rate_limit_headers: RateLimitHeaders,
	) -> Result<Self> {
		let http = Client::builder()
			.redirect(redirect::Policy::none())
			.user_agent(USER_AGENT)
			.build()?;

		Ok(Self { http, base_url, request_timeout, rate_limit_headers })
	}

	/// Execute one attempt against the upstream for `indicator`, authenticated with `credential`.
	#[tracing::instrument(skip(self, credential), fields(credential = %credential.id()))]
	pub async fn fetch(&self, indicator: &Indicator, credential: &Credential) -> Outcome {
		let url = match self.endpoint(indicator) {
			Ok(url) => url,
			Err(err) => return Outcome::Failed { reason: err.to_string() },
		};

		let response = self
			.http
			.get(url.clone())
			.header(CREDENTIAL_HEADER, &credential.secret)
			.timeout(self.request_timeout)
			.send()
			.await;

		let response = match response {
			Ok(response) => response,
			Err(err) => {
				tracing::debug!(url = %url, error = %err, "upstream request failed");

				return Outcome::Transient { reason: err.to_string() };
			},
		};

		let status = response.status();
		let quota = self.read_quota(response.headers());

		if status.is_success() {
			return self.parse_hit(response, quota).await;
		}
		if status == StatusCode::NOT_FOUND {
			return Outcome::Empty;
		}
		if status == StatusCode::TOO_MANY_REQUESTS {
			let retry_after = self.read_retry_after(response.headers());

			return Outcome::RateLimited { retry_after, reset_header: quota.reset_at };
		}
		if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
			let body = response.text().await.ok();

			return Outcome::Invalid { reason: format_status_reason(status, &url, body) };
		}
		if status.is_server_error() {
			let body = response.text().await.ok();

			return Outcome::Transient { reason: format_status_reason(status, &url, body) };
		}

		let body = response.text().await.ok();

		Outcome::Failed { reason: format_status_reason(status, &url, body) }
	}

	async fn parse_hit(&self, response: reqwest::Response, quota: QuotaObservation) -> Outcome {
		let bytes = match response.bytes().await {
			Ok(bytes) => bytes,
			Err(err) => return Outcome::Transient { reason: err.to_string() },
		};

		let parsed: std::result::Result<ResponseBody, _> = serde_json::from_slice(&bytes);

		match parsed {
			Ok(body) => {
				let stats = body.data.attributes.last_analysis_stats;
				let summary = Summary {
					malicious: stats.malicious,
					suspicious: stats.suspicious,
					clean: stats.harmless,
					undetected: stats.undetected,
				};

				Outcome::Hit { summary, quota }
			},
			Err(err) => {
				tracing::debug!(error = %err, "upstream response body did not parse");

				Outcome::Transient { reason: format!("unparseable response body: {err}") }
			},
		}
	}

	fn endpoint(&self, indicator: &Indicator) -> Result<Url> {
		let segment = match indicator.kind {
			IndicatorKind::Hash => "files",
			IndicatorKind::Ip => "ip_addresses",
			IndicatorKind::Domain => "domains",
			IndicatorKind::Url => "urls",
		};
		let mut url = self.base_url.clone();

		url.path_segments_mut()
			.map_err(|()| Error::Validation {
				field: "upstream_base_url",
				reason: "Base URL cannot be used as a segment base.".into(),
			})?
			.pop_if_empty()
			.push(segment)
			.push(&indicator.endpoint_segment());

		Ok(url)
	}

	fn read_quota(&self, headers: &HeaderMap) -> QuotaObservation {
		let remaining =
			headers.get(&self.rate_limit_headers.remaining).and_then(|v| v.to_str().ok()).and_then(|s| s.parse().ok());
		let reset_at = headers
			.get(&self.rate_limit_headers.reset)
			.and_then(|v| v.to_str().ok())
			.and_then(|s| s.parse::<i64>().ok())
			.and_then(|epoch| DateTime::<Utc>::from_timestamp(epoch, 0));

		QuotaObservation { remaining, reset_at }
	}

	fn read_retry_after(&self, headers: &HeaderMap) -> Option<Duration> {
		headers
			.get(&self.rate_limit_headers.retry_after)
			.and_then(|v| v.to_str().ok())
			.and_then(|s| s.parse::<u64>().ok())
			.map(StdDuration::from_secs)
	}
}

fn format_status_reason(status: StatusCode, url: &Url, body: Option<String>) -> String {
	let body = body.filter(|body| !body.is_empty());

	Error::HttpStatus { status, url: url.clone(), body }.to_string()
}
