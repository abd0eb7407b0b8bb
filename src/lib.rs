//! pack - Build container images from application source
//!
//! Runs the lifecycle phase binaries of a builder image in rootless
//! containers and coordinates them through ephemeral volumes.

pub mod builder;
pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod image;
pub mod lifecycle;
pub mod orchestration;

pub use error::{PackError, PackResult};
