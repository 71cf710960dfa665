//! Run stages that prepare the environment before any build
//!
//! Each stage is fatal on failure: the pipeline stops and no platform is
//! attempted.

pub mod auth;
pub mod builder;
pub mod emulation;
pub mod provision;

pub use auth::{authenticate, authenticate_with_retry, AuthSession, RetryPolicy};
pub use builder::{acquire_builder, BuilderHandle};
pub use emulation::register_emulation;
pub use provision::{provision, MountAction, ProvisionSummary};
