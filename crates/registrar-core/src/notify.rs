//! ---
//! reg_section: "01-core-functionality"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Notification sink seam and in-process sinks."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::event::{EnrollmentEvent, COURSE_UPDATED, ENROLLMENT_CHANGED};

/// Fire-and-forget delivery of named events to listeners.
///
/// Implementations must not block and must treat "nobody is listening" as
/// success.
pub trait NotificationSink: Send + Sync + 'static {
    /// Deliver to every listener.
    fn broadcast(&self, event: &str, payload: &Value);

    /// Deliver only to listeners subscribed to `topic`.
    fn publish(&self, topic: &str, event: &str, payload: &Value);
}

/// Emit the standard pair of notifications for one enrollment change.
pub fn announce_enrollment(sink: &dyn NotificationSink, event: &EnrollmentEvent) {
    match serde_json::to_value(event) {
        Ok(payload) => {
            sink.broadcast(ENROLLMENT_CHANGED, &payload);
            sink.publish(&event.room(), COURSE_UPDATED, &payload);
        }
        Err(err) => warn!(
            course_code = %event.course_code,
            error = %err,
            "failed to encode enrollment event"
        ),
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn broadcast(&self, _event: &str, _payload: &Value) {}

    fn publish(&self, _topic: &str, _event: &str, _payload: &Value) {}
}

/// One recorded delivery. `topic` is `None` for broadcasts.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: Option<String>,
    pub event: String,
    pub payload: Value,
}

/// Records every delivery in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    deliveries: Mutex<Vec<Delivery>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    pub fn take(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.deliveries.lock())
    }

    pub fn events_named(&self, event: &str) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .iter()
            .filter(|delivery| delivery.event == event)
            .cloned()
            .collect()
    }
}

impl NotificationSink for MemorySink {
    fn broadcast(&self, event: &str, payload: &Value) {
        self.deliveries.lock().push(Delivery {
            topic: None,
            event: event.to_owned(),
            payload: payload.clone(),
        });
    }

    fn publish(&self, topic: &str, event: &str, payload: &Value) {
        self.deliveries.lock().push(Delivery {
            topic: Some(topic.to_owned()),
            event: event.to_owned(),
            payload: payload.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.broadcast("enrollment-changed", &json!({"n": 1}));
        sink.publish("course-COMP308", "course-updated", &json!({"n": 1}));

        let deliveries = sink.take();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].topic, None);
        assert_eq!(deliveries[1].topic.as_deref(), Some("course-COMP308"));
        assert!(sink.deliveries().is_empty());
    }
}
