//! Event delivery from the worker to subscribers.
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::data_model::{RunStatus, StageEvent};

/// Receiving half handed to the front-end. Usable from async code
/// (`recv().await`) and from plain threads (`blocking_recv()`).
pub type EventStream = UnboundedReceiver<StageEvent>;

/// Sending half owned by the worker.
///
/// Sends never block the pipeline; if the subscriber is gone the
/// event is dropped and the run carries on.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: UnboundedSender<StageEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: StageEvent) {
        let _ = self.tx.send(event);
    }

    pub fn log(&self, text: impl Into<String>) {
        self.emit(StageEvent::LogLine { text: text.into() });
    }

    pub fn progress(&self, percent: u8) {
        self.emit(StageEvent::Progress { percent });
    }

    pub fn finished(&self, status: RunStatus, message: impl Into<String>) {
        self.emit(StageEvent::RunFinished {
            status,
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_order() {
        let (sink, mut rx) = EventSink::channel();
        sink.log("one");
        sink.progress(10);
        sink.emit(StageEvent::SegmentationStarted);

        assert_eq!(rx.try_recv().unwrap(), StageEvent::LogLine { text: "one".into() });
        assert_eq!(rx.try_recv().unwrap(), StageEvent::Progress { percent: 10 });
        assert_eq!(rx.try_recv().unwrap(), StageEvent::SegmentationStarted);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_after_subscriber_dropped_is_silent() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.log("nobody listens");
        sink.finished(RunStatus::Success, "done");
    }
}
