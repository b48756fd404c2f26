//! Resilience helpers shared by the loan pipeline services.
//!
//! Currently provides bounded retry with exponential backoff and jitter,
//! used by the consumer to retry transient store failures before a message
//! is given up on.
//!
//! # Example
//!
//! ```rust,no_run
//! use resilience::{with_retry_if, RetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RetryConfig::default();
//!
//!     let result = with_retry_if(
//!         &config,
//!         |err: &String| err.starts_with("transient"),
//!         || async { Ok::<_, String>(()) },
//!     )
//!     .await;
//!
//!     assert!(result.is_ok());
//! }
//! ```

pub mod retry;

pub use retry::{with_retry, with_retry_if, RetryConfig, RetryError};
