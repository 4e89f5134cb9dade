//! streamq Tests - integration and deterministic simulation tests.
//!
//! Everything here runs against the simulated transport and checkpoint
//! store, under tokio's paused clock, so every run is reproducible.
//!
//! ## Test Organization
//!
//! **DST Tests** (`*_dst.rs`): seeded fault injection
//! - `adapter_dst`: random produce/pull/ack/restart sequences checked
//!   against the delivery properties
//!
//! **Integration Tests** (`*_tests.rs`): multi-component scenarios
//! - `adapter_tests`: restart, rebalance, lagging readers, send timeouts
//!
//! **Support Modules**:
//! - `harness`: simulated cluster and adapter construction
//! - `properties`: delivery property checker
//! - `scenarios`: seeds and option presets
//!
//! ## Naming Conventions
//!
//! - DST tests: `test_dst_<component>_<scenario>`
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod harness;
pub mod properties;
pub mod scenarios;

#[cfg(test)]
mod adapter_dst;

#[cfg(test)]
mod adapter_tests;
