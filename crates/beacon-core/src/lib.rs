//! Shared configuration and error types for the Beacon workspace.

pub mod config;
pub mod error;

pub use config::BeaconConfig;
pub use error::{BeaconError, Result};
