//! Event system for shield verdicts.
//!
//! Provides hooks for metrics, logging, and custom reactions to admission,
//! automation, and rapid-viewing outcomes.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::automation::AutomationReport;
use super::metrics::ShieldMetrics;

#[derive(Debug, Clone)]
pub struct AdmissionEvent {
    pub identity: String,
    pub remaining: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DenialEvent {
    pub identity: String,
    pub retry_after: Option<Duration>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AutomationEvent {
    pub report: AutomationReport,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RapidViewEvent {
    pub flagged: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ShieldEvent {
    RequestAdmitted(AdmissionEvent),
    RequestDenied(DenialEvent),
    AutomationEvaluated(AutomationEvent),
    RapidViewing(RapidViewEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &ShieldEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: ShieldEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &ShieldEvent) {
        match event {
            ShieldEvent::RequestAdmitted(admitted) => {
                log::debug!("admit {} ({} left)", admitted.identity, admitted.remaining);
            }
            ShieldEvent::RequestDenied(denied) => {
                log::info!(
                    "deny {} retry after {:.2}s",
                    denied.identity,
                    denied.retry_after.unwrap_or_default().as_secs_f64()
                );
            }
            ShieldEvent::AutomationEvaluated(evaluated) => {
                if evaluated.report.is_automated() {
                    let probes: Vec<_> =
                        evaluated.report.matched.iter().map(|probe| probe.name()).collect();
                    log::info!("automation suspected: {}", probes.join(", "));
                } else {
                    log::debug!(
                        "automation probes clean ({} failed)",
                        evaluated.report.failed.len()
                    );
                }
            }
            ShieldEvent::RapidViewing(view) => {
                if view.flagged {
                    log::warn!("rapid viewing flagged");
                }
            }
        }
    }
}

/// Metrics handler that feeds the shield metrics.
#[derive(Clone, Debug)]
pub struct MetricsHandler {
    metrics: ShieldMetrics,
}

impl MetricsHandler {
    pub fn new(metrics: ShieldMetrics) -> Self {
        Self { metrics }
    }
}

impl EventHandler for MetricsHandler {
    fn handle(&self, event: &ShieldEvent) {
        match event {
            ShieldEvent::RequestAdmitted(admitted) => {
                self.metrics.record_admission(&admitted.identity);
            }
            ShieldEvent::RequestDenied(denied) => {
                self.metrics.record_denial(&denied.identity, denied.timestamp);
            }
            ShieldEvent::AutomationEvaluated(evaluated) => {
                self.metrics.record_automation(evaluated.report.is_automated());
            }
            ShieldEvent::RapidViewing(view) => {
                self.metrics.record_view(view.flagged);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::sync::Mutex<usize>);

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &ShieldEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn dispatches_to_handlers() {
        let mut dispatcher = EventDispatcher::new();
        let counter = Arc::new(CountingHandler(std::sync::Mutex::new(0)));
        dispatcher.register_handler(counter.clone());
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher.dispatch(ShieldEvent::RequestDenied(DenialEvent {
            identity: "GET:/api/properties".into(),
            retry_after: Some(Duration::from_secs(3)),
            timestamp: Utc::now(),
        }));
        assert_eq!(*counter.0.lock().unwrap(), 1);
    }

    #[test]
    fn metrics_handler_counts_verdicts() {
        let metrics = ShieldMetrics::new();
        let handler = MetricsHandler::new(metrics.clone());
        handler.handle(&ShieldEvent::RapidViewing(RapidViewEvent {
            flagged: true,
            timestamp: Utc::now(),
        }));
        handler.handle(&ShieldEvent::RequestAdmitted(AdmissionEvent {
            identity: "GET:/".into(),
            remaining: 4,
            timestamp: Utc::now(),
        }));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rapid_view_flags, 1);
        assert_eq!(snapshot.admitted, 1);
    }
}
