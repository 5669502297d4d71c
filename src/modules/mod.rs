//! Cross-cutting services module
//!
//! Admission control, burst detection, automation heuristics, and request
//! fingerprinting, plus the events and metrics that observe them.

pub mod automation;
pub mod clock;
pub mod events;
pub mod fingerprint;
pub mod metrics;
pub mod rapid_viewing;
pub mod rate_limit;

// Re-export commonly used types
pub use automation::{
    AUTOMATION_MARKERS, AutomationDetector, AutomationProbe, AutomationReport,
    USER_AGENT_DENY_LIST,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::{
    AdmissionEvent, AutomationEvent, DenialEvent, EventDispatcher, EventHandler, LoggingHandler,
    MetricsHandler, RapidViewEvent, ShieldEvent,
};
pub use fingerprint::{ClientEnvironment, FingerprintBuilder, FingerprintRecord};
pub use metrics::{IdentityStats, MetricsSnapshot, ShieldMetrics};
pub use rapid_viewing::{RapidViewDetector, RapidViewPolicy};
pub use rate_limit::{
    PolicyError, RateLimitDecision, RateLimitPolicy, RequestIdentity, SlidingWindowLimiter,
};
