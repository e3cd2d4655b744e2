//! Execution Context: per-run state handed to every stage
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::data_model::Device;
use crate::events::EventSink;

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub device: Device,
    pub total_cases: usize,
    events: EventSink,
    cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(
        device: Device,
        total_cases: usize,
        events: EventSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            device,
            total_cases,
            events,
            cancel,
        }
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Shorthand for a log line event.
    pub fn log(&self, text: impl Into<String>) {
        self.events.log(text);
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
