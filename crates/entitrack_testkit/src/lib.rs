//! # EntiTrack Testkit
//!
//! Test utilities for EntiTrack.
//!
//! This crate provides:
//! - Entity type fixtures covering every capability combination
//! - An in-memory persistence engine with injectable failures
//! - Recording fakes of caches, listeners and delete policies
//! - A test environment wiring everything into a persistence support
//! - Property-based test generators using proptest
//! - Capture of tracing events for asserting diagnostics
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entitrack_testkit::prelude::*;
//!
//! #[test]
//! fn commit_publishes_create() {
//!     let mut env = TestEnv::new();
//!     let mut ctx = env.begin();
//!     env.persist(&mut ctx, new_order(10)).unwrap();
//!     env.commit(&mut ctx).unwrap();
//!     assert_eq!(env.published().len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod capture;
pub mod engine;
pub mod fakes;
pub mod fixtures;
pub mod generators;
pub mod harness;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::capture::*;
    pub use crate::engine::*;
    pub use crate::fakes::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
    pub use crate::init_tracing;
}

pub use capture::*;
pub use engine::*;
pub use fakes::*;
pub use fixtures::*;
pub use generators::*;
pub use harness::*;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs the subscriber.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
