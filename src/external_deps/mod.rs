//! Integrations that rely on outside runtimes.
//!
//! This module groups adapters for client environment probing and durable
//! storage that bridge the core heuristics with the hosting environment.

pub mod environment;
pub mod storage;

pub use environment::{BoaEnvironmentProbe, EnvironmentProbe, ProbeError, StaticEnvironment};
pub use storage::{KeyValueStore, MemoryStore, RedbStore, StorageError};
