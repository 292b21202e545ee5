//! Tracing test utilities for event capture and verification.
//!
//! Provides `EventCaptureLayer`, `EventStore`, and an initialization helper
//! for verifying that expected log events are emitted during rebuilds. Uses
//! `tracing::subscriber::set_default()` for test isolation (each test gets
//! its own subscriber via the returned `DefaultGuard`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

// =============================================================================
// CapturedEvent — one recorded log event
// =============================================================================

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: tracing::Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

// =============================================================================
// EventStore — thread-safe accumulator of captured events
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct EventStore(Arc<Mutex<Vec<CapturedEvent>>>);

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if any event with the given message was captured.
    pub fn has_message(&self, message: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e.message == message)
    }

    /// Returns the first event with the given message, if any.
    pub fn find_event(&self, message: &str) -> Option<CapturedEvent> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.message == message)
            .cloned()
    }
}

// =============================================================================
// EventCaptureLayer — records events into an EventStore
// =============================================================================

pub struct EventCaptureLayer {
    store: EventStore,
}

impl EventCaptureLayer {
    pub fn new(store: EventStore) -> Self {
        Self { store }
    }
}

impl<S: Subscriber> Layer<S> for EventCaptureLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = FieldVisitor(HashMap::new());
        event.record(&mut fields);
        let message = fields.0.remove("message").unwrap_or_default();

        self.store.0.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message,
            fields: fields.0,
        });
    }
}

// =============================================================================
// FieldVisitor — extracts typed event fields into a HashMap<String, String>
// =============================================================================

struct FieldVisitor(HashMap<String, String>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{:?}", value));
    }
    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }
}

// =============================================================================
// Initialization helpers
// =============================================================================

/// Captures every event emitted on the current thread.
///
/// Returns an `EventStore` for assertions and a `DefaultGuard` that must be
/// held alive for the duration of the test. The subscriber is active only
/// while the guard is alive, providing test isolation.
pub fn init_test_tracing() -> (EventStore, tracing::subscriber::DefaultGuard) {
    let store = EventStore::new();
    let layer = EventCaptureLayer::new(store.clone());
    let subscriber = tracing_subscriber::registry::Registry::default().with(layer);
    let guard = tracing::subscriber::set_default(subscriber);
    (store, guard)
}
