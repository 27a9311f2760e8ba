//! Shared test utilities for scout integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: In-memory storage with operation recording
//! - [`ScriptedRemote`]: A remote authority with injected failures
//! - [`TestContext`]: A database wired to both
//! - Factory functions for keys and payloads
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use scout_test_utils::*;
//!
//! #[tokio::test]
//! async fn failed_push_stays_queued() {
//!     let ctx = TestContext::new().await;
//!     ctx.remote.fail_key(&team_key(118));
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Helpers panic on setup failures.
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod remote;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use remote::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("scout_sync=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
