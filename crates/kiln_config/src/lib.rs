//! Parsing and validation of `kiln.toml` service configuration files.
//!
//! This crate reads the configuration file and produces a strongly-typed
//! [`Config`] with engine limits, cache selection, toolchain descriptors,
//! libraries and tools, plus toolchain resolution against shared defaults.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod resolve;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str};
pub use resolve::{resolve_toolchain, ResolvedToolchain};
pub use types::*;
