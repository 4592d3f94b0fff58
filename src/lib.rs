//! bucketkeeper library -- declarative bucket reconciliation for
//! S3-compatible object stores.
//!
//! This crate provides the core components for converging desired
//! bucket specs (name, versioning, object locking) onto an S3-compatible
//! store: a storage convergence engine, a reconciler that persists cycle
//! outcomes, a retrying scheduler, and pluggable store backends.

pub mod config;
pub mod engine;
pub mod errors;
pub mod metrics;
pub mod reconciler;
pub mod scheduler;
pub mod status;
pub mod store;
