//! multipush - multi-architecture container build-and-publish
//!
//! Provisions a build host, registers emulation, builds one image per
//! platform on a shared buildx builder and pushes each under a floating and
//! an immutable tag, keeping a persistent content-addressed build cache.

pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod platform;
pub mod report;
pub mod stages;
pub mod trigger;
pub mod ui;

pub use error::{Outcome, PublishError};
