//! Configuration module for Page-Harvest
//!
//! This module handles loading, validating and persisting the TOML run
//! configuration. The file is read once at start and only rewritten when an
//! operator explicitly changes a value between runs.
//!
//! # Example
//!
//! ```no_run
//! use page_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Harvesting with {} workers", config.run.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{FetchConfig, OutputConfig, RunConfig, RunSettings, SourceConfig};

// Re-export parser functions
pub use parser::{hash_config, load_config, load_config_with_hash, save_config};
pub use validation::validate;
