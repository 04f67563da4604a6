//! In-process event dispatcher keyed by [`EventKey`].

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::events::{EventHandler, EventKey, EventSource, Subscription};

/// Capacity of the raw event tap.
const TAP_CAPACITY: usize = 256;

struct Listener {
    id: u64,
    handler: Arc<Mutex<Option<EventHandler>>>,
}

type Listeners = HashMap<EventKey, Vec<Listener>>;

/// Event dispatcher the push transport feeds into.
///
/// Handlers run synchronously on the emitting task, in registration order.
/// Once [`Subscription::detach`] returns, the handler will not be invoked
/// again; a delivery already running finishes first.
pub struct EventHub {
    next_id: AtomicU64,
    listeners: Arc<RwLock<Listeners>>,
    tap: broadcast::Sender<(EventKey, Value)>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);
        Self {
            next_id: AtomicU64::new(1),
            listeners: Arc::new(RwLock::new(HashMap::new())),
            tap,
        }
    }

    /// Deliver `payload` to every handler registered for `key`.
    ///
    /// Returns the number of handlers invoked.
    pub fn emit(&self, key: &EventKey, payload: &Value) -> usize {
        let _ = self.tap.send((key.clone(), payload.clone()));

        let handlers: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|ls| ls.iter().map(|l| Arc::clone(&l.handler)).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for slot in handlers {
            let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(handler) = guard.as_ref() {
                handler(payload);
                delivered += 1;
            }
        }
        tracing::trace!(%key, delivered, "event dispatched");
        delivered
    }

    /// Number of live handlers for `key`.
    #[must_use]
    pub fn listener_count(&self, key: &EventKey) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Receiver observing every emitted event, whether or not anyone handles it.
    #[must_use]
    pub fn tap(&self) -> broadcast::Receiver<(EventKey, Value)> {
        self.tap.subscribe()
    }

    fn remove(listeners: &Weak<RwLock<Listeners>>, key: &EventKey, id: u64) {
        let Some(listeners) = listeners.upgrade() else {
            return;
        };
        let mut map = listeners.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = map.get_mut(key) {
            entries.retain(|l| l.id != id);
            if entries.is_empty() {
                map.remove(key);
            }
        }
    }
}

impl EventSource for EventHub {
    fn on(&self, key: EventKey, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Mutex::new(Some(handler)));

        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .push(Listener {
                id,
                handler: Arc::clone(&slot),
            });

        let listeners = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            Self::remove(&listeners, &key, id);
            slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::events::{EventKind, NATIVE_APP_NAMESPACE};

    fn progress_key(id: &str) -> EventKey {
        EventKey::for_resource(NATIVE_APP_NAMESPACE, EventKind::BriefcaseDownloadProgress, id)
    }

    fn counting_handler(counter: &Arc<AtomicUsize>) -> EventHandler {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn delivers_only_to_matching_resource() {
        let hub = EventHub::new();
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let _sa = hub.on(progress_key("a"), counting_handler(&a));
        let _sb = hub.on(progress_key("b"), counting_handler(&b));

        assert_eq!(hub.emit(&progress_key("a"), &Value::Null), 1);
        hub.emit(&progress_key("a"), &Value::Null);
        hub.emit(&progress_key("b"), &Value::Null);

        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn detached_handler_is_not_invoked() {
        let hub = EventHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sub = hub.on(progress_key("a"), counting_handler(&count));
        let other = hub.on(progress_key("a"), counting_handler(&count));

        hub.emit(&progress_key("a"), &Value::Null);
        sub.detach();
        sub.detach();
        assert_eq!(hub.listener_count(&progress_key("a")), 1);

        hub.emit(&progress_key("a"), &Value::Null);
        assert_eq!(count.load(Ordering::SeqCst), 3);

        drop(other);
        assert_eq!(hub.listener_count(&progress_key("a")), 0);
        assert_eq!(hub.emit(&progress_key("a"), &Value::Null), 0);
    }

    #[test]
    fn tap_sees_unhandled_events() {
        let hub = EventHub::new();
        let mut tap = hub.tap();
        let key = EventKey::new(NATIVE_APP_NAMESPACE, EventKind::MemoryWarning);
        hub.emit(&key, &Value::Null);
        let (seen, _) = tap.try_recv().unwrap();
        assert_eq!(seen, key);
    }
}
