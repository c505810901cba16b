//! Shared test utilities for censusgen integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated worker runs over temp directories and an in-memory database
//! - `Behavior` for scripting what each fake mapper does

pub mod harness;

pub use harness::{census_b64, Behavior, TestHarness};
