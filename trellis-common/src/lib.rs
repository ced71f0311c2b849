//! # Trellis Common Library
//!
//! Shared code for the Trellis request-processing engine including:
//! - Error types
//! - Engine configuration loading (TOML bootstrap)
//! - Ordered request/URI parameter storage

pub mod config;
pub mod error;
pub mod params;

pub use config::{EngineConfig, ResultConfig};
pub use error::{Error, Result};
pub use params::Parameters;
