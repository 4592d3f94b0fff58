//! Object store implementations.

pub mod aws;
pub mod client;
pub mod memory;
