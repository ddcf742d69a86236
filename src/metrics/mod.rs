//! Prometheus metrics for the Backstore Operator
//!
//! This module exposes metrics for monitoring queue, reconciler and poller health.

mod prometheus;

pub use prometheus::*;
