//! # DbMirror Testkit
//!
//! Test utilities for DbMirror.
//!
//! This crate provides:
//! - [`TestSite`], a site with every engine component wired together
//! - Property-based test generators using proptest
//! - Logging setup for tests
//!
//! ## Usage
//!
//! ```rust
//! use dbmirror_testkit::prelude::*;
//!
//! with_site(|site| {
//!     let key = site.insert_post("Hello", "publish");
//!     assert!(site.snapshot_path("post", key).is_some());
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_test_logging;
}

pub use fixtures::*;
pub use generators::*;

/// Installs a test subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
