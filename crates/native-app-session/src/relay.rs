//! Re-publishes host-pushed events to local observers.

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use native_app_core::{
    ConnectivityStatus, EventKey, EventKind, EventSource, ProgressInfo, Subscription,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

#[derive(Deserialize)]
struct ConnectivityPayload {
    status: ConnectivityStatus,
}

#[derive(Deserialize)]
struct ProgressPayload {
    progress: ProgressInfo,
}

/// Forwards memory-warning and connectivity-changed events to any number of
/// local observers, and hands out per-briefcase progress subscriptions.
pub struct EventRelay {
    source: Arc<dyn EventSource>,
    namespace: String,
    memory_warning: broadcast::Sender<()>,
    connectivity_changed: broadcast::Sender<ConnectivityStatus>,
    _subscriptions: [Subscription; 2],
}

impl EventRelay {
    /// Subscribe to the namespace-wide events on `source`. A zero
    /// `capacity` is raised to one.
    #[must_use]
    pub fn new(
        source: Arc<dyn EventSource>,
        namespace: impl Into<String>,
        capacity: usize,
    ) -> Self {
        let namespace = namespace.into();
        let capacity = capacity.max(1);
        let (memory_warning, _) = broadcast::channel(capacity);
        let (connectivity_changed, _) = broadcast::channel(capacity);

        let tx = memory_warning.clone();
        let on_memory = source.on(
            EventKey::new(namespace.clone(), EventKind::MemoryWarning),
            Arc::new(move |_: &Value| {
                tracing::warn!("host reported memory warning");
                let _ = tx.send(());
            }),
        );

        let tx = connectivity_changed.clone();
        let on_connectivity = source.on(
            EventKey::new(namespace.clone(), EventKind::InternetConnectivityChanged),
            Arc::new(move |payload: &Value| match ConnectivityPayload::deserialize(payload) {
                Ok(p) => {
                    let _ = tx.send(p.status);
                }
                Err(e) => tracing::warn!("Ignoring malformed connectivity event: {e}"),
            }),
        );

        Self {
            source,
            namespace,
            memory_warning,
            connectivity_changed,
            _subscriptions: [on_memory, on_connectivity],
        }
    }

    /// Receiver for host memory warnings.
    #[must_use]
    pub fn on_memory_warning(&self) -> broadcast::Receiver<()> {
        self.memory_warning.subscribe()
    }

    /// Receiver for the host's connectivity changes.
    #[must_use]
    pub fn on_connectivity_changed(&self) -> broadcast::Receiver<ConnectivityStatus> {
        self.connectivity_changed.subscribe()
    }

    /// Connectivity changes as a stream; lagged notifications are skipped.
    #[must_use]
    pub fn connectivity_stream(&self) -> BoxStream<'static, ConnectivityStatus> {
        BroadcastStream::new(self.on_connectivity_changed())
            .filter_map(|res| async move { res.ok() })
            .boxed()
    }

    /// Deliver progress for `imodel_id` to `on_progress` until detached.
    pub fn on_download_progress<F>(&self, imodel_id: &str, on_progress: F) -> Subscription
    where
        F: Fn(ProgressInfo) + Send + Sync + 'static,
    {
        let key = EventKey::for_resource(
            self.namespace.clone(),
            EventKind::BriefcaseDownloadProgress,
            imodel_id,
        );
        self.source.on(
            key,
            Arc::new(move |payload: &Value| match ProgressPayload::deserialize(payload) {
                Ok(p) => on_progress(p.progress),
                Err(e) => tracing::warn!("Ignoring malformed progress event: {e}"),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use native_app_core::{EventHub, NATIVE_APP_NAMESPACE};
    use serde_json::json;

    use super::*;

    fn relay() -> (Arc<EventHub>, EventRelay) {
        let hub = Arc::new(EventHub::new());
        let relay = EventRelay::new(hub.clone(), NATIVE_APP_NAMESPACE, 8);
        (hub, relay)
    }

    fn progress_key(id: &str) -> EventKey {
        EventKey::for_resource(NATIVE_APP_NAMESPACE, EventKind::BriefcaseDownloadProgress, id)
    }

    #[test]
    fn forwards_memory_warning_to_every_observer() {
        let (hub, relay) = relay();
        let mut a = relay.on_memory_warning();
        let mut b = relay.on_memory_warning();

        hub.emit(&EventKey::new(NATIVE_APP_NAMESPACE, EventKind::MemoryWarning), &Value::Null);

        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn forwards_connectivity_status() {
        let (hub, relay) = relay();
        let mut rx = relay.on_connectivity_changed();
        let key = EventKey::new(NATIVE_APP_NAMESPACE, EventKind::InternetConnectivityChanged);

        hub.emit(&key, &json!({ "status": "offline" }));
        hub.emit(&key, &json!({ "unexpected": 1 }));
        hub.emit(&key, &json!({ "status": "online" }));

        assert_eq!(rx.try_recv().unwrap(), ConnectivityStatus::Offline);
        assert_eq!(rx.try_recv().unwrap(), ConnectivityStatus::Online);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn zero_capacity_still_delivers() {
        let hub = Arc::new(EventHub::new());
        let relay = EventRelay::new(hub.clone(), NATIVE_APP_NAMESPACE, 0);
        let mut rx = relay.on_memory_warning();

        hub.emit(&EventKey::new(NATIVE_APP_NAMESPACE, EventKind::MemoryWarning), &Value::Null);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn ignores_other_namespaces() {
        let (hub, relay) = relay();
        let mut rx = relay.on_memory_warning();
        hub.emit(&EventKey::new("Other", EventKind::MemoryWarning), &Value::Null);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn progress_subscriptions_do_not_cross_deliver() {
        let (hub, relay) = relay();
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen_a);
        let sub_a = relay.on_download_progress("im-1", move |p| sink.lock().unwrap().push(p));
        let sink = Arc::clone(&seen_b);
        let _sub_b = relay.on_download_progress("im-12", move |p| sink.lock().unwrap().push(p));

        hub.emit(&progress_key("im-1"), &json!({ "progress": { "loaded": 10, "total": 100 } }));
        hub.emit(&progress_key("im-12"), &json!({ "progress": { "loaded": 3 } }));
        sub_a.detach();
        sub_a.detach();
        hub.emit(&progress_key("im-1"), &json!({ "progress": { "loaded": 20, "total": 100 } }));

        assert_eq!(*seen_a.lock().unwrap(), vec![ProgressInfo::new(10, Some(100))]);
        assert_eq!(*seen_b.lock().unwrap(), vec![ProgressInfo::new(3, None)]);
    }

    #[tokio::test]
    async fn connectivity_stream_yields_statuses() {
        let (hub, relay) = relay();
        let mut stream = relay.connectivity_stream();
        let key = EventKey::new(NATIVE_APP_NAMESPACE, EventKind::InternetConnectivityChanged);
        hub.emit(&key, &json!({ "status": "offline" }));
        assert_eq!(stream.next().await, Some(ConnectivityStatus::Offline));
    }
}
