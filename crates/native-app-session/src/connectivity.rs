//! Connectivity tracking and platform online/offline signals.

use std::sync::{
    Arc, Mutex, PoisonError, Weak,
    atomic::{AtomicBool, Ordering},
};

use native_app_core::{ConnectivityOverrideSource, ConnectivityStatus, NativeAppRpc, RpcError};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};

/// Platform source of online/offline signals.
pub trait ConnectivitySignal: Send + Sync {
    /// The platform's current view, if it exposes one.
    fn current(&self) -> Option<ConnectivityStatus>;

    /// Stream of platform transitions, or `None` when the platform has none.
    fn subscribe(&self) -> Option<broadcast::Receiver<ConnectivityStatus>>;
}

/// Platform without connectivity signals (headless hosts, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSignal;

impl ConnectivitySignal for NoSignal {
    fn current(&self) -> Option<ConnectivityStatus> {
        None
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ConnectivityStatus>> {
        None
    }
}

/// Signal driven by the embedding application, e.g. from OS callbacks.
pub struct ChannelSignal {
    tx: broadcast::Sender<ConnectivityStatus>,
    current: Mutex<Option<ConnectivityStatus>>,
}

impl ChannelSignal {
    /// Create a signal with an optional initial reading.
    #[must_use]
    pub fn new(initial: Option<ConnectivityStatus>) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            tx,
            current: Mutex::new(initial),
        }
    }

    /// Report a platform transition.
    pub fn set(&self, status: ConnectivityStatus) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
        let _ = self.tx.send(status);
    }

    pub fn online(&self) {
        self.set(ConnectivityStatus::Online);
    }

    pub fn offline(&self) {
        self.set(ConnectivityStatus::Offline);
    }
}

impl ConnectivitySignal for ChannelSignal {
    fn current(&self) -> Option<ConnectivityStatus> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ConnectivityStatus>> {
        Some(self.tx.subscribe())
    }
}

/// Local source of truth for online/offline status.
///
/// Both the platform listener and user overrides funnel into
/// [`set_connectivity`](Self::set_connectivity). Concurrent callers are not
/// serialized: the last call to complete wins.
pub struct ConnectivityTracker {
    rpc: Arc<dyn NativeAppRpc>,
    signal: Arc<dyn ConnectivitySignal>,
    online: AtomicBool,
    status: watch::Sender<ConnectivityStatus>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityTracker {
    /// Create a tracker, initially online.
    #[must_use]
    pub fn new(rpc: Arc<dyn NativeAppRpc>, signal: Arc<dyn ConnectivitySignal>) -> Arc<Self> {
        let (status, _) = watch::channel(ConnectivityStatus::Online);
        Arc::new(Self {
            rpc,
            signal,
            online: AtomicBool::new(true),
            status,
            listener: Mutex::new(None),
        })
    }

    /// Flag gating outbound request behavior.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Last status set locally.
    #[must_use]
    pub fn status(&self) -> ConnectivityStatus {
        *self.status.borrow()
    }

    /// Receiver notified whenever the status actually changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.status.subscribe()
    }

    /// The platform's current reading, if any.
    #[must_use]
    pub fn platform_status(&self) -> Option<ConnectivityStatus> {
        self.signal.current()
    }

    /// Update the local flag, inform the host, then notify local observers.
    ///
    /// # Errors
    /// Returns the host error if the override call fails; the local flag
    /// has already been updated and observers are not notified.
    pub async fn set_connectivity(
        &self,
        by: ConnectivityOverrideSource,
        status: ConnectivityStatus,
    ) -> Result<(), RpcError> {
        self.online.store(status.is_online(), Ordering::SeqCst);
        tracing::debug!(?by, ?status, "override_connectivity");
        self.rpc.override_connectivity(by, status).await?;

        let changed = self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            tracing::info!(?by, ?status, "connectivity changed");
        }
        Ok(())
    }

    /// Ask the host for its view, bypassing local state.
    ///
    /// # Errors
    /// Returns the host error unchanged.
    pub async fn check(&self) -> Result<ConnectivityStatus, RpcError> {
        tracing::debug!("check_connectivity");
        self.rpc.check_connectivity().await
    }

    /// Start forwarding platform signals. No-op if already hooked or if the
    /// platform has no signal.
    pub fn hook(self: &Arc<Self>) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }
        let Some(rx) = self.signal.subscribe() else {
            tracing::debug!("no platform connectivity signal, not hooking");
            return;
        };
        *listener = Some(tokio::spawn(Self::listen(Arc::downgrade(self), rx)));
    }

    /// Stop forwarding platform signals. No-op if not hooked.
    pub fn unhook(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    #[must_use]
    pub fn is_hooked(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    async fn listen(tracker: Weak<Self>, mut rx: broadcast::Receiver<ConnectivityStatus>) {
        loop {
            let status = match rx.recv().await {
                Ok(status) => status,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "platform connectivity signals dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Some(tracker) = tracker.upgrade() else {
                break;
            };
            if let Err(e) = tracker
                .set_connectivity(ConnectivityOverrideSource::SystemSignal, status)
                .await
            {
                tracing::warn!("Failed to report platform connectivity: {e}");
            }
        }
    }
}

impl Drop for ConnectivityTracker {
    fn drop(&mut self) {
        self.unhook();
    }
}
