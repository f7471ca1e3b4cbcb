//! Upstream Adapter (§4.5): endpoint construction, the HTTP exchange, and
//! status interpretation against the third-party reputation service.

pub mod client;

pub use client::{Outcome, QuotaObservation, UpstreamClient};
