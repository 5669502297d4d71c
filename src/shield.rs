//! High level shield orchestration.
//!
//! Wires the sliding-window limiter, rapid-view detector, automation
//! heuristics, and fingerprint builder behind one handle that an API-call
//! wrapper consults before issuing each request.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;
use url::Url;

use crate::config::{ConfigError, ShieldConfig};
use crate::external_deps::environment::EnvironmentProbe;
use crate::external_deps::storage::{KeyValueStore, MemoryStore, RedbStore, StorageError};
use crate::modules::automation::{AutomationDetector, AutomationReport};
use crate::modules::clock::{Clock, SystemClock};
use crate::modules::events::{
	AdmissionEvent, AutomationEvent, DenialEvent, EventDispatcher, EventHandler, LoggingHandler,
	MetricsHandler, RapidViewEvent, ShieldEvent,
};
use crate::modules::fingerprint::FingerprintBuilder;
use crate::modules::metrics::ShieldMetrics;
use crate::modules::rapid_viewing::RapidViewDetector;
use crate::modules::rate_limit::{RequestIdentity, SlidingWindowLimiter};

/// Result alias used across the orchestration layer.
pub type ShieldResult<T> = Result<T, ShieldError>;

#[derive(Debug, Error)]
pub enum ShieldError {
	#[error("rate limit exceeded for {identity}, retry in {}s", retry_after_secs(.retry_after))]
	RateLimited {
		identity: String,
		retry_after: Option<Duration>,
	},
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("storage error: {0}")]
	Storage(#[from] StorageError),
}

impl ShieldError {
	/// HTTP status a collaborator should surface for this error, if any.
	pub fn status_code(&self) -> Option<StatusCode> {
		match self {
			ShieldError::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
			_ => None,
		}
	}

	/// Whole seconds until a retry may succeed, rounded up.
	pub fn retry_after_secs(&self) -> Option<u64> {
		match self {
			ShieldError::RateLimited { retry_after, .. } => Some(retry_after_secs(retry_after)),
			_ => None,
		}
	}
}

fn retry_after_secs(retry_after: &Option<Duration>) -> u64 {
	retry_after
		.map(|wait| wait.as_millis().div_ceil(1000) as u64)
		.unwrap_or(0)
}

/// Fluent builder for [`ClientShield`].
pub struct ClientShieldBuilder<C: Clock + Clone = SystemClock> {
	config: ShieldConfig,
	clock: C,
	store: Option<Arc<dyn KeyValueStore>>,
	automation: AutomationDetector,
	handlers: Vec<Arc<dyn EventHandler>>,
	enable_logging: bool,
}

impl ClientShieldBuilder<SystemClock> {
	pub fn new() -> Self {
		Self {
			config: ShieldConfig::default(),
			clock: SystemClock,
			store: None,
			automation: AutomationDetector::new(),
			handlers: Vec::new(),
			enable_logging: true,
		}
	}
}

impl Default for ClientShieldBuilder<SystemClock> {
	fn default() -> Self {
		Self::new()
	}
}

impl<C: Clock + Clone> ClientShieldBuilder<C> {
	pub fn with_config(mut self, config: ShieldConfig) -> Self {
		self.config = config;
		self
	}

	pub fn with_clock<D: Clock + Clone>(self, clock: D) -> ClientShieldBuilder<D> {
		ClientShieldBuilder {
			config: self.config,
			clock,
			store: self.store,
			automation: self.automation,
			handlers: self.handlers,
			enable_logging: self.enable_logging,
		}
	}

	/// Overrides the store backing the rapid-view log. Takes precedence over
	/// `storage_path`.
	pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
		self.store = Some(store);
		self
	}

	pub fn with_automation_detector(mut self, detector: AutomationDetector) -> Self {
		self.automation = detector;
		self
	}

	pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.handlers.push(handler);
		self
	}

	pub fn disable_logging(mut self) -> Self {
		self.enable_logging = false;
		self
	}

	pub fn build(self) -> ShieldResult<ClientShield<C>> {
		let rate_policy = self.config.rate_limit.policy().map_err(ConfigError::from)?;
		let view_policy = self.config.rapid_view.policy().map_err(ConfigError::from)?;

		let store: Arc<dyn KeyValueStore> = match (self.store, &self.config.storage_path) {
			(Some(store), _) => store,
			(None, Some(path)) => Arc::new(RedbStore::open(path)?),
			(None, None) => Arc::new(MemoryStore::new()),
		};

		let metrics = ShieldMetrics::new();
		let mut events = EventDispatcher::new();
		if self.enable_logging {
			events.register_handler(Arc::new(LoggingHandler));
		}
		events.register_handler(Arc::new(MetricsHandler::new(metrics.clone())));
		for handler in self.handlers {
			events.register_handler(handler);
		}

		Ok(ClientShield {
			limiter: SlidingWindowLimiter::with_clock(rate_policy, self.clock.clone()),
			rapid_views: RapidViewDetector::with_clock(store, view_policy, self.clock.clone()),
			automation: self.automation,
			fingerprints: FingerprintBuilder::with_clock(
				self.config.fingerprint.clone(),
				self.clock.clone(),
			),
			clock: self.clock,
			metrics,
			events,
		})
	}
}

/// Request gate combining admission control, rapid-view detection,
/// automation heuristics, and fingerprinting.
pub struct ClientShield<C: Clock = SystemClock> {
	limiter: SlidingWindowLimiter<C>,
	rapid_views: RapidViewDetector<Arc<dyn KeyValueStore>, C>,
	automation: AutomationDetector,
	fingerprints: FingerprintBuilder<C>,
	clock: C,
	metrics: ShieldMetrics,
	events: EventDispatcher,
}

impl ClientShield<SystemClock> {
	/// Construct a shield with default configuration and in-memory storage.
	pub fn new() -> ShieldResult<Self> {
		ClientShieldBuilder::new().build()
	}

	pub fn builder() -> ClientShieldBuilder {
		ClientShieldBuilder::new()
	}
}

impl<C: Clock> ClientShield<C> {
	/// Admits the request and returns `headers` enriched with the client
	/// fingerprint, or a rate-limit error when the identity's quota is spent.
	pub fn prepare_request(
		&self,
		method: &Method,
		url: &Url,
		headers: &HeaderMap,
	) -> ShieldResult<HeaderMap> {
		let identity = RequestIdentity::from_request(method, url);
		let decision = self.limiter.check(identity.as_str());
		let timestamp = self.clock.now_utc();

		if !decision.admitted {
			self.events.dispatch(ShieldEvent::RequestDenied(DenialEvent {
				identity: identity.to_string(),
				retry_after: decision.retry_after,
				timestamp,
			}));
			return Err(ShieldError::RateLimited {
				identity: identity.to_string(),
				retry_after: decision.retry_after,
			});
		}

		self.events.dispatch(ShieldEvent::RequestAdmitted(AdmissionEvent {
			identity: identity.to_string(),
			remaining: decision.remaining,
			timestamp,
		}));

		Ok(self.fingerprints.enrich(headers))
	}

	pub fn remaining_requests(&self, method: &Method, url: &Url) -> u32 {
		let identity = RequestIdentity::from_request(method, url);
		self.limiter.remaining_requests(identity.as_str())
	}

	/// Records a property view; `true` means the view burst was flagged.
	pub fn record_property_view(&self) -> bool {
		let flagged = self.rapid_views.record_view();
		self.events.dispatch(ShieldEvent::RapidViewing(RapidViewEvent {
			flagged,
			timestamp: self.clock.now_utc(),
		}));
		flagged
	}

	pub fn evaluate_automation(&self, env: &dyn EnvironmentProbe) -> AutomationReport {
		let report = self.automation.evaluate(env);
		self.events.dispatch(ShieldEvent::AutomationEvaluated(AutomationEvent {
			report: report.clone(),
			timestamp: self.clock.now_utc(),
		}));
		report
	}

	pub fn is_automated(&self, env: &dyn EnvironmentProbe) -> bool {
		self.evaluate_automation(env).is_automated()
	}

	pub fn limiter(&self) -> &SlidingWindowLimiter<C> {
		&self.limiter
	}

	pub fn rapid_views(&self) -> &RapidViewDetector<Arc<dyn KeyValueStore>, C> {
		&self.rapid_views
	}

	pub fn fingerprints(&self) -> &FingerprintBuilder<C> {
		&self.fingerprints
	}

	pub fn metrics(&self) -> &ShieldMetrics {
		&self.metrics
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::modules::clock::ManualClock;

	#[test]
	fn rate_limited_error_reads_like_a_429() {
		let err = ShieldError::RateLimited {
			identity: "GET:/api/properties".into(),
			retry_after: Some(Duration::from_millis(4200)),
		};
		assert_eq!(err.status_code(), Some(StatusCode::TOO_MANY_REQUESTS));
		assert_eq!(err.retry_after_secs(), Some(5));
		assert_eq!(
			err.to_string(),
			"rate limit exceeded for GET:/api/properties, retry in 5s"
		);
	}

	#[test]
	fn build_rejects_invalid_config() {
		let mut config = ShieldConfig::default();
		config.rate_limit.max_requests = 0;
		let err = ClientShield::builder().with_config(config).build().err().unwrap();
		assert!(matches!(err, ShieldError::Config(ConfigError::Policy(_))));
	}

	#[test]
	fn opens_redb_store_from_storage_path() {
		let dir = tempfile::tempdir().unwrap();
		let config = ShieldConfig::builder()
			.storage_path(dir.path().join("views.redb"))
			.build()
			.unwrap();
		let shield = ClientShield::builder()
			.with_config(config)
			.with_clock(ManualClock::new(5_000))
			.build()
			.unwrap();
		assert!(!shield.record_property_view());
		assert_eq!(shield.rapid_views().recent_views(), vec![5_000]);
	}

	#[derive(Default)]
	struct Timestamps(std::sync::Mutex<Vec<i64>>);

	impl EventHandler for Timestamps {
		fn handle(&self, event: &ShieldEvent) {
			let at = match event {
				ShieldEvent::RequestAdmitted(admitted) => admitted.timestamp,
				ShieldEvent::RequestDenied(denied) => denied.timestamp,
				ShieldEvent::AutomationEvaluated(evaluated) => evaluated.timestamp,
				ShieldEvent::RapidViewing(view) => view.timestamp,
			};
			self.0.lock().unwrap().push(at.timestamp_millis());
		}
	}

	#[test]
	fn events_and_metrics_follow_the_injected_clock() {
		let clock = ManualClock::new(1_700_000_000_000);
		let config = ShieldConfig::builder()
			.rate_limit(1, Duration::from_secs(60))
			.build()
			.unwrap();
		let recorder = Arc::new(Timestamps::default());
		let shield = ClientShield::builder()
			.with_config(config)
			.with_clock(clock.clone())
			.with_handler(recorder.clone())
			.disable_logging()
			.build()
			.unwrap();
		let url = Url::parse("https://example.com/api/properties").unwrap();

		shield.prepare_request(&Method::GET, &url, &HeaderMap::new()).unwrap();
		clock.advance(Duration::from_millis(250));
		assert!(shield.prepare_request(&Method::GET, &url, &HeaderMap::new()).is_err());
		clock.advance(Duration::from_millis(250));
		shield.record_property_view();

		assert_eq!(
			*recorder.0.lock().unwrap(),
			vec![1_700_000_000_000, 1_700_000_000_250, 1_700_000_000_500]
		);
		let snapshot = shield.metrics().snapshot();
		assert_eq!(
			snapshot.identities[0].last_denied_at,
			Some(clock.now_utc() - chrono::Duration::milliseconds(250))
		);
	}
}
