// Event Sink
// Fan-out seam between services and the web layer's broadcast bus

use serde_json::Value;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

/// Sink that discards everything; used in tests and headless contexts
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &str, _payload: Value) {}
}
