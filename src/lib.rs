pub mod config;
pub mod core;

// Re-export commonly used items for convenience
pub use crate::config::{ClientConfig, ConfigError};
pub use crate::core::*;
