//! End-to-end test harness for Kubernetes workloads.
//!
//! Tests are grouped into [features](features::Feature) made of setup,
//! assessment and teardown steps. An [environment](env::Environment)
//! runs lifecycle hooks around them, filters them by name and label, and
//! reports the results. The [`wait`] module polls cluster state until a
//! condition holds.

pub mod context;
pub mod emit;
pub mod env;
pub mod envconf;
pub mod envfuncs;
pub mod error;
pub mod features;
pub mod klient;
pub mod provider;
pub mod telemetry;
pub mod testing;
pub mod wait;

pub use error::{Error, Result};
