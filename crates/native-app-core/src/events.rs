//! Push-event vocabulary and the subscription interface.
//!
//! Events are routed by an [`EventKey`]: a namespace, an [`EventKind`]
//! and, for per-resource events, the resource identifier. Keys are
//! compared structurally, so a subscription for one briefcase never sees
//! another briefcase's events.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Namespace the host publishes native-app events under.
pub const NATIVE_APP_NAMESPACE: &str = "NativeApp";

/// Kinds of events pushed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The host process is under memory pressure. No payload.
    MemoryWarning,
    /// The host's connectivity view changed. Payload: `{"status": ...}`.
    InternetConnectivityChanged,
    /// Progress of one briefcase download. Payload: `{"progress": ...}`.
    BriefcaseDownloadProgress,
}

/// Routing key for a push event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub namespace: String,
    pub kind: EventKind,
    pub resource: Option<String>,
}

impl EventKey {
    /// Key for a namespace-wide event.
    #[must_use]
    pub fn new(namespace: impl Into<String>, kind: EventKind) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            resource: None,
        }
    }

    /// Key for an event scoped to one resource.
    #[must_use]
    pub fn for_resource(
        namespace: impl Into<String>,
        kind: EventKind,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            resource: Some(resource.into()),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.namespace, self.kind)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{resource}")?;
        }
        Ok(())
    }
}

/// Callback invoked with the raw event payload.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Transport delivering host-pushed events to the client.
pub trait EventSource: Send + Sync {
    /// Register `handler` for events matching `key`.
    ///
    /// The handler must not detach its own subscription from inside the
    /// callback.
    fn on(&self, key: EventKey, handler: EventHandler) -> Subscription;
}

/// Handle for one registered event handler.
///
/// Detaching is idempotent. Dropping the handle detaches it.
pub struct Subscription {
    detach: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Wrap the function that unregisters the handler.
    #[must_use]
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            detach: Mutex::new(Some(Box::new(detach))),
        }
    }

    /// A subscription with nothing to detach.
    #[must_use]
    pub fn noop() -> Self {
        Self {
            detach: Mutex::new(None),
        }
    }

    /// Unregister the handler. Later calls do nothing.
    pub fn detach(&self) {
        let detach = self
            .detach
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(detach) = detach {
            detach();
        }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.detach
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// One progress sample for a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Units transferred so far.
    pub loaded: u64,
    /// Total units, when known.
    #[serde(default)]
    pub total: Option<u64>,
}

impl ProgressInfo {
    #[must_use]
    pub const fn new(loaded: u64, total: Option<u64>) -> Self {
        Self { loaded, total }
    }

    /// Completion percentage, when the total is known and non-zero.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some(self.loaded as f64 * 100.0 / total as f64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn resource_keys_do_not_collide() {
        let progress = |id: &str| {
            EventKey::for_resource(NATIVE_APP_NAMESPACE, EventKind::BriefcaseDownloadProgress, id)
        };
        let a = progress("im-1");
        let b = progress("im-10");
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "NativeApp/BriefcaseDownloadProgress/im-1");
    }

    #[test]
    fn detach_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sub = Subscription::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sub.is_attached());
        sub.detach();
        sub.detach();
        drop(sub);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn percent_needs_total() {
        assert_eq!(ProgressInfo::new(50, Some(200)).percent(), Some(25.0));
        assert_eq!(ProgressInfo::new(50, None).percent(), None);
        assert_eq!(ProgressInfo::new(0, Some(0)).percent(), None);
    }
}
