//! HTTP client building with middleware.

mod client;
mod retry;

pub use client::{is_idempotent, HttpClientBuilder, HttpClientConfig, ResourceClient};
pub use retry::BackoffPolicy;
