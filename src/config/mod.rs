//! Configuration module for html-snapshots
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Options such as the selector or timeout may be given globally or per URL.
//!
//! # Example
//!
//! ```no_run
//! use html_snapshots::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("snapshots.toml")).unwrap();
//! println!("Capturing from {:?} input", config.input.kind);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    CaptureConfig, Config, FetchConfig, InputConfig, OutputConfig, PerUrl, RendererConfig,
    Source, DEFAULT_KEY,
};
pub(crate) use types::lookup_keys;

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;
