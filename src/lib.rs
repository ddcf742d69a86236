//! Backstore Kubernetes Operator
//!
//! This operator reconciles `Backup` resources into CSI VolumeSnapshots and
//! `Restore` resources into PersistentVolumeClaims provisioned from those
//! snapshots, tracking each through `status.progress`.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod reconcilers;

pub use error::{Error, Result};
