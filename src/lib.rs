//! # client-shield
//!
//! Client-side request throttling and automation heuristics for browsing
//! front ends.
//!
//! ## Features
//!
//! - Sliding-window rate limiting keyed by `METHOD:PATH` identities
//! - Rapid-viewing detection backed by durable storage
//! - Automation heuristics over an injectable environment probe
//! - Request fingerprint headers for server-side correlation
//!
//! ## Example
//!
//! ```no_run
//! use client_shield::ClientShield;
//! use http::{HeaderMap, Method};
//! use url::Url;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let shield = ClientShield::new()?;
//!     let url = Url::parse("https://example.com/api/properties")?;
//!     let headers = shield.prepare_request(&Method::GET, &url, &HeaderMap::new())?;
//!     println!("sending with {} headers", headers.len());
//!     Ok(())
//! }
//! ```

mod shield;

pub mod config;
pub mod external_deps;
pub mod modules;

pub use crate::shield::{ClientShield, ClientShieldBuilder, ShieldError, ShieldResult};

pub use crate::config::{
    ConfigError, RapidViewSettings, RateLimitSettings, ShieldConfig, ShieldConfigBuilder,
};

pub use crate::external_deps::{
    BoaEnvironmentProbe, EnvironmentProbe, KeyValueStore, MemoryStore, ProbeError, RedbStore,
    StaticEnvironment, StorageError,
};

pub use crate::modules::{
    AutomationDetector, AutomationProbe, AutomationReport, ClientEnvironment, Clock,
    EventDispatcher, EventHandler, FingerprintBuilder, FingerprintRecord, LoggingHandler,
    ManualClock, MetricsHandler, MetricsSnapshot, PolicyError, RapidViewDetector,
    RapidViewPolicy, RateLimitDecision, RateLimitPolicy, RequestIdentity, ShieldEvent,
    ShieldMetrics, SlidingWindowLimiter, SystemClock,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
