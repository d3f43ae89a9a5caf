//! Shared test utilities for shelfsync integration tests.
//!
//! - `TestHarness` wires a runner, tracker and reconciler over temp directories
//! - `CandidateBuilder` builds recommendation candidates without boilerplate

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
