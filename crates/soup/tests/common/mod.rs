//! Shared test utilities for soup integration tests.
//!
//! - Fakes for every reconciler collaborator
//! - `ReconcileHarness` wiring a reconciler to those fakes in a temp dir

pub mod fakes;
pub mod harness;

pub use fakes::*;
pub use harness::ReconcileHarness;
