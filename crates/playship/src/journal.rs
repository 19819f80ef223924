//! Reporter and event log of a single publish.

use playship_events::EventLog;
use playship_types::EventType;

use crate::engine::Reporter;

/// Human-facing reporter plus the structured event log of one publish.
pub struct Journal<'r> {
    reporter: &'r mut dyn Reporter,
    events: EventLog,
    variant: String,
}

impl<'r> Journal<'r> {
    pub fn new(reporter: &'r mut dyn Reporter, variant: &str) -> Self {
        Self {
            reporter,
            events: EventLog::new(),
            variant: variant.to_string(),
        }
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn info(&mut self, msg: &str) {
        self.reporter.info(msg);
    }

    pub fn warn(&mut self, msg: &str) {
        self.reporter.warn(msg);
    }

    pub fn error(&mut self, msg: &str) {
        self.reporter.error(msg);
    }

    pub fn record(&mut self, event: EventType) {
        self.events.record_now(&self.variant, event);
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }
}
