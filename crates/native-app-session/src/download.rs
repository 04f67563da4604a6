//! Download session lifecycle: start, finish, cancel.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use native_app_core::{
    BriefcaseProps, NativeAppRpc, ProgressInfo, RpcError, Subscription, VersionSelector,
};

use crate::relay::EventRelay;

/// Where a download stands, as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// The host was asked to begin the download.
    Requested,
    /// At least one progress sample arrived.
    InProgress,
    Finished,
    Cancelled,
    Failed,
}

impl DownloadState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Failed)
    }
}

/// Handle for a started download.
///
/// Consumed by [`DownloadManager::finish`] or [`DownloadManager::cancel`],
/// so it cannot be presented twice. Dropping an unconsumed token stops
/// progress delivery but leaves the host-side download running.
#[derive(Debug)]
#[must_use = "a started download must be finished or cancelled"]
pub struct DownloadToken {
    props: BriefcaseProps,
    progress: Subscription,
}

impl DownloadToken {
    /// Props returned by the host, including its allocated key.
    pub const fn props(&self) -> &BriefcaseProps {
        &self.props
    }

    pub fn imodel_id(&self) -> &str {
        &self.props.imodel_id
    }

    /// Whether progress events are still being delivered.
    pub fn reports_progress(&self) -> bool {
        self.progress.is_attached()
    }
}

type StateMap = Arc<Mutex<HashMap<String, DownloadState>>>;

/// Drives downloads against the host and tracks their state by dataset id.
///
/// One state is kept per dataset until [`forget`](Self::forget) drops it.
pub struct DownloadManager {
    rpc: Arc<dyn NativeAppRpc>,
    relay: Arc<EventRelay>,
    states: StateMap,
}

impl DownloadManager {
    #[must_use]
    pub fn new(rpc: Arc<dyn NativeAppRpc>, relay: Arc<EventRelay>) -> Self {
        Self {
            rpc,
            relay,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Last known state of the download for `imodel_id`.
    #[must_use]
    pub fn state(&self, imodel_id: &str) -> Option<DownloadState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(imodel_id)
            .copied()
    }

    /// Drop the state for `imodel_id` unless a download is still in flight.
    pub fn forget(&self, imodel_id: &str) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        if states.get(imodel_id).is_some_and(|s| s.is_terminal()) {
            states.remove(imodel_id);
        }
    }

    /// Dataset ids whose download has not reached a terminal state.
    #[must_use]
    pub fn in_flight(&self) -> Vec<String> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Resolve `version` and build the request props.
    ///
    /// # Errors
    /// Returns the host error if the version cannot be resolved.
    pub async fn resolve(
        &self,
        context_id: &str,
        imodel_id: &str,
        version: &VersionSelector,
    ) -> Result<BriefcaseProps, RpcError> {
        tracing::debug!(imodel_id, ?version, "resolve_version");
        let changeset_id = self.rpc.resolve_version(imodel_id, version).await?;
        Ok(BriefcaseProps::new(context_id, imodel_id, changeset_id))
    }

    /// Download in one call, completing when the host does.
    ///
    /// # Errors
    /// Returns the resolution or download error unchanged.
    pub async fn download(
        &self,
        context_id: &str,
        imodel_id: &str,
        version: &VersionSelector,
    ) -> Result<BriefcaseProps, RpcError> {
        let request = self.resolve(context_id, imodel_id, version).await?;
        self.set_state(imodel_id, DownloadState::Requested);

        tracing::debug!(imodel_id, changeset_id = %request.changeset_id, "download_briefcase");
        let result = self.rpc.download_briefcase(&request).await;
        self.set_state(imodel_id, terminal_state(&result, DownloadState::Finished));
        result
    }

    /// Begin a download, optionally delivering progress to `on_progress`.
    ///
    /// The progress subscription is attached before the host is asked to
    /// begin, so samples emitted during the call are not lost. If the
    /// begin call fails the subscription is detached and no token is
    /// returned.
    ///
    /// # Errors
    /// Returns the resolution or begin error unchanged.
    pub async fn start<F>(
        &self,
        context_id: &str,
        imodel_id: &str,
        version: &VersionSelector,
        on_progress: Option<F>,
    ) -> Result<DownloadToken, RpcError>
    where
        F: Fn(ProgressInfo) + Send + Sync + 'static,
    {
        let request = self.resolve(context_id, imodel_id, version).await?;
        self.set_state(imodel_id, DownloadState::Requested);

        let report_progress = on_progress.is_some();
        let progress = match on_progress {
            Some(callback) => {
                let states = Arc::clone(&self.states);
                let id = imodel_id.to_owned();
                self.relay.on_download_progress(imodel_id, move |info| {
                    mark_in_progress(&states, &id);
                    callback(info);
                })
            }
            None => Subscription::noop(),
        };

        tracing::debug!(imodel_id, report_progress, "start_download_briefcase");
        match self.rpc.start_download_briefcase(&request, report_progress).await {
            Ok(props) => Ok(DownloadToken { props, progress }),
            Err(e) => {
                progress.detach();
                self.set_state(imodel_id, DownloadState::Failed);
                Err(e)
            }
        }
    }

    /// Wait for the download to complete. Progress delivery stops whether
    /// or not the host call succeeds.
    ///
    /// # Errors
    /// Returns the host error unchanged.
    pub async fn finish(&self, token: DownloadToken) -> Result<(), RpcError> {
        let DownloadToken { props, progress } = token;
        tracing::debug!(
            imodel_id = %props.imodel_id,
            key = %props.key,
            "finish_download_briefcase"
        );

        let result = self.rpc.finish_download_briefcase(&props).await;
        progress.detach();

        self.set_state(&props.imodel_id, terminal_state(&result, DownloadState::Finished));
        result
    }

    /// Cancel the download. Returns `false` if it had already completed.
    /// Progress delivery stops whatever the outcome.
    ///
    /// # Errors
    /// Returns the host error unchanged.
    pub async fn cancel(&self, token: DownloadToken) -> Result<bool, RpcError> {
        let DownloadToken { props, progress } = token;
        tracing::debug!(
            imodel_id = %props.imodel_id,
            key = %props.key,
            "cancel_download_briefcase"
        );

        let result = self.rpc.cancel_download_briefcase(&props).await;
        progress.detach();

        match result {
            Ok(true) => self.set_state(&props.imodel_id, DownloadState::Cancelled),
            Ok(false) => self.set_state(&props.imodel_id, DownloadState::Finished),
            Err(_) => {}
        }
        result
    }

    fn set_state(&self, imodel_id: &str, state: DownloadState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(imodel_id.to_owned(), state);
    }
}

const fn terminal_state<T>(result: &Result<T, RpcError>, ok: DownloadState) -> DownloadState {
    if result.is_ok() { ok } else { DownloadState::Failed }
}

fn mark_in_progress(states: &Mutex<HashMap<String, DownloadState>>, imodel_id: &str) {
    let mut states = states.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(state) = states.get_mut(imodel_id) {
        if *state == DownloadState::Requested {
            *state = DownloadState::InProgress;
        }
    }
}
