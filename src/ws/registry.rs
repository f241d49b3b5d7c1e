//! Message type → handler mapping.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;

use super::envelope::MessageEnvelope;

/// Caller-supplied message handler.
///
/// Handlers run inline on the connection's dispatch loop, so they must not block.
pub type Handler = Arc<dyn Fn(&MessageEnvelope) + Send + Sync>;

/// Wrap a typed callback in a [`Handler`] that decodes the payload first.
///
/// Payloads that fail to decode are logged and dropped.
pub fn typed_handler<T, F>(handler: F) -> Handler
where
    T: DeserializeOwned + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    Arc::new(move |envelope: &MessageEnvelope| match envelope.payload_as::<T>() {
        Ok(payload) => handler(payload),
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(msg_type = %envelope.msg_type, error = %e, "Dropping undecodable payload");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    })
}

/// A set of handlers to install when connecting.
#[derive(Default, Clone)]
pub struct Handlers {
    entries: HashMap<String, Handler>,
}

impl Handlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a raw envelope handler. A later entry for the same type replaces the earlier one.
    #[must_use]
    pub fn on<S, F>(mut self, msg_type: S, handler: F) -> Self
    where
        S: Into<String>,
        F: Fn(&MessageEnvelope) + Send + Sync + 'static,
    {
        self.entries.insert(msg_type.into(), Arc::new(handler));
        self
    }

    /// Add a handler receiving the decoded payload.
    #[must_use]
    pub fn on_typed<S, T, F>(mut self, msg_type: S, handler: F) -> Self
    where
        S: Into<String>,
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.entries.insert(msg_type.into(), typed_handler(handler));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Shared handler table. Exactly one handler per message type; last registration wins.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: Arc<DashMap<String, Handler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `msg_type`, returning the handler it replaced.
    pub fn insert<S: Into<String>>(&self, msg_type: S, handler: Handler) -> Option<Handler> {
        self.handlers.insert(msg_type.into(), handler)
    }

    /// Install every entry of `handlers`, replacing existing registrations of the same type.
    pub fn extend(&self, handlers: Handlers) {
        for (msg_type, handler) in handlers.entries {
            self.handlers.insert(msg_type, handler);
        }
    }

    /// Remove the handler for `msg_type`. Returns whether one was registered.
    pub fn remove(&self, msg_type: &str) -> bool {
        self.handlers.remove(msg_type).is_some()
    }

    #[must_use]
    pub fn contains(&self, msg_type: &str) -> bool {
        self.handlers.contains_key(msg_type)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Invoke the handler registered for the envelope's type.
    ///
    /// Returns `false` when no handler is registered. The map shard lock is released
    /// before the handler runs, so handlers may register or remove handlers themselves.
    pub fn dispatch(&self, envelope: &MessageEnvelope) -> bool {
        let handler = self
            .handlers
            .get(&envelope.msg_type)
            .map(|entry| Arc::clone(entry.value()));

        match handler {
            Some(handler) => {
                handler(envelope);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler_count = Arc::clone(&count);
        let handler: Handler = Arc::new(move |_: &MessageEnvelope| {
            handler_count.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn dispatch_invokes_registered_handler() {
        let registry = HandlerRegistry::new();
        let (count, handler) = counter();
        registry.insert("alert", handler);

        assert!(registry.dispatch(&MessageEnvelope::outbound("alert", json!({}))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregistered_type_is_dropped() {
        let registry = HandlerRegistry::new();
        let (count, handler) = counter();
        registry.insert("alert", handler);

        assert!(!registry.dispatch(&MessageEnvelope::outbound("camera_status", json!({}))));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn last_registration_wins() {
        let registry = HandlerRegistry::new();
        let (first, first_handler) = counter();
        let (second, second_handler) = counter();

        assert!(registry.insert("alert", first_handler).is_none());
        assert!(registry.insert("alert", second_handler).is_some());
        registry.dispatch(&MessageEnvelope::outbound("alert", json!({})));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_and_clear() {
        let registry = HandlerRegistry::new();
        let (_, handler) = counter();
        registry.insert("a", Arc::clone(&handler));
        registry.insert("b", handler);

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(registry.contains("b"));

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn handler_may_reenter_registry() {
        let registry = HandlerRegistry::new();
        let inner = registry.clone();
        registry.insert(
            "once",
            Arc::new(move |_: &MessageEnvelope| {
                inner.remove("once");
            }),
        );

        assert!(registry.dispatch(&MessageEnvelope::outbound("once", json!(null))));
        assert!(!registry.contains("once"));
    }

    #[derive(Debug, Deserialize)]
    struct Alert {
        camera_id: String,
    }

    #[test]
    fn typed_handlers_decode_payload_and_skip_garbage() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let registry = HandlerRegistry::new();
        registry.extend(Handlers::new().on_typed("alert", move |alert: Alert| {
            sink.lock().unwrap().push(alert.camera_id);
        }));

        registry.dispatch(&MessageEnvelope::outbound("alert", json!({ "camera_id": "cam-3" })));
        registry.dispatch(&MessageEnvelope::outbound("alert", json!({ "camera": 3 })));

        assert_eq!(*seen.lock().unwrap(), ["cam-3"]);
    }

    #[test]
    fn handlers_builder_replaces_duplicates() {
        let handlers = Handlers::new()
            .on("alert", |_| {})
            .on("alert", |_| {})
            .on("summary", |_| {});

        assert_eq!(handlers.len(), 2);
    }
}
