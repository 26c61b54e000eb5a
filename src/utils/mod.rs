//! Utility modules supporting the ingest pipeline.
//!
//! - [`HttpClient`]: shared reqwest client with timeouts and a user agent
//! - [`RateLimiter`]: minimum-spacing limiter shared by fetch and download
//! - [`Clock`]: time source behind rate limiting and backoff, with a
//!   [`ManualClock`] for deterministic tests
//! - [`with_retry`]: run an operation, retrying transient failures with linear backoff
//! - [`safe_file_stem`]: turn a record id into a cache file name

mod http;
mod rate_limit;
mod retry;
mod validate;

pub use http::{HttpClient, DEFAULT_USER_AGENT};
pub use rate_limit::{Clock, ManualClock, RateLimiter, SystemClock};
pub use retry::{with_retry, Retried, RetryConfig, RetryFailure};
pub use validate::{safe_file_stem, upgrade_to_https, validate_url, ValidationError};
