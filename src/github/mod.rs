//! GitHub REST API integration: shared rate-limit budgeting, raw wire
//! types, and a paginated client with retry handling.

pub mod client;
pub mod rate_limit;
pub mod types;

pub use client::{FetchError, GithubClient};
pub use rate_limit::{Budget, RateLimitSnapshot, RateLimiter};
