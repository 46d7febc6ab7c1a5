//! Core types and configuration for brandpulse.
//!
//! Holds the brand alias catalog, the term matcher that detects brand
//! mentions in free text, the normalized `RawEvent` record shape, and
//! env-driven application configuration. Everything here is pure and
//! I/O-free apart from reading the brands YAML file.

use thiserror::Error;

pub mod app_config;
pub mod brands;
pub mod config;
pub mod event;
pub mod matcher;

pub use app_config::{AppConfig, Environment};
pub use brands::{load_brands, BrandConfig, BrandsFile};
pub use config::{load_app_config, load_app_config_from_env};
pub use event::{content_hash, RawEvent};
pub use matcher::{score, MatchPosition, MatchResult, ACCEPT_THRESHOLD};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read brands file {path}: {source}")]
    BrandsFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse brands file: {0}")]
    BrandsFileParse(#[from] serde_yaml::Error),

    #[error("invalid brands config: {0}")]
    Validation(String),
}
