//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Builder pattern
//! - JSON loading
//! - Fail-fast policy validation

pub mod settings;

pub use settings::{
    ConfigError, RapidViewSettings, RateLimitSettings, ShieldConfig, ShieldConfigBuilder,
};
