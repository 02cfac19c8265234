//! Test utilities and fixtures for kinline
//!
//! Shared by the unit tests, the integration tests under `tests/` and the
//! benchmarks.

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use harness::{init_tracing, InlineHarness};
pub use mocks::{MapClassProvider, MockSourceCompiler};
