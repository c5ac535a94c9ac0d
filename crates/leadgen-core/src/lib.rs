//! Leadgen Core - Foundation crate for the leadgen reveal pipeline.
//!
//! This crate provides the shared types, error handling and configuration
//! management that the other leadgen crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared newtypes (`Identifier`, `CorrelationKey`, `Timestamp`)
//!
//! # Example
//!
//! ```rust
//! use leadgen_core::{AppConfig, Identifier, IdentifierKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! assert_eq!(config.provider.max_batch_size, 100);
//!
//! let id = Identifier::new("jane@example.com")?;
//! assert_eq!(id.kind(), IdentifierKind::Email);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, LimiterConfig, ProviderConfig, ReceiverConfig, RevealConfig, StorageConfig,
};
pub use error::{ConfigError, ConfigResult, LeadgenError, Result};
pub use types::{CorrelationKey, Identifier, IdentifierKind, Timestamp};
