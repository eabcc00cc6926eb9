//! drive-cli library: Exposes the CLI's building blocks for testing.
//!
//! This is a thin library layer over the `drive` binary, allowing
//! integration tests to load fixtures and drive sessions directly.

pub mod config;
pub mod fixture;
pub mod render;
pub mod session;

// Re-export key types for convenience
pub use config::{Config, ConfigError};
pub use fixture::{Fixture, FixtureError, ReplayEvent};
pub use session::Session;
