//! The native-app session bridge: lifecycle guard and public facade.

use std::sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
};

use native_app_core::{
    AppConfig, BridgeConfig, BriefcaseProps, ConnectivityOverrideSource, ConnectivityStatus,
    EventSource, LocalBriefcase, NativeAppRpc, ProgressInfo, VersionSelector,
};
use tokio::sync::{broadcast, watch};

use crate::{
    briefcase::{BriefcaseClient, BriefcaseConnection},
    connectivity::{ConnectivitySignal, ConnectivityTracker},
    download::{DownloadManager, DownloadState, DownloadToken},
    error::{NativeAppError, Result},
    logging::LogBuffer,
    relay::EventRelay,
    storage::{Storage, StorageCache},
};

/// Client-side bridge to the native host.
///
/// Every remote operation requires [`startup`](Self::startup) to have
/// completed and fails with [`NativeAppError::NotStarted`] otherwise,
/// without contacting the host.
pub struct NativeApp {
    rpc: Arc<dyn NativeAppRpc>,
    config: BridgeConfig,
    app_config: RwLock<AppConfig>,
    started: AtomicBool,
    relay: Arc<EventRelay>,
    connectivity: Arc<ConnectivityTracker>,
    briefcases: BriefcaseClient,
    storages: StorageCache,
    logs: Option<LogBuffer>,
}

impl NativeApp {
    /// Wire a bridge to `rpc`, receiving pushed events from `events`.
    #[must_use]
    pub fn new(
        rpc: Arc<dyn NativeAppRpc>,
        events: Arc<dyn EventSource>,
        signal: Arc<dyn ConnectivitySignal>,
        config: BridgeConfig,
    ) -> Self {
        let relay = Arc::new(EventRelay::new(
            events,
            config.event_namespace.clone(),
            config.notification_capacity,
        ));
        let downloads = DownloadManager::new(Arc::clone(&rpc), Arc::clone(&relay));

        Self {
            connectivity: ConnectivityTracker::new(Arc::clone(&rpc), signal),
            briefcases: BriefcaseClient::new(Arc::clone(&rpc), downloads),
            storages: StorageCache::new(Arc::clone(&rpc)),
            app_config: RwLock::new(AppConfig::new()),
            started: AtomicBool::new(false),
            logs: None,
            relay,
            config,
            rpc,
        }
    }

    /// Local config values, overridden by whatever the host reports at startup.
    #[must_use]
    pub fn with_defaults(self, defaults: AppConfig) -> Self {
        *self.app_config.write().unwrap_or_else(PoisonError::into_inner) = defaults;
        self
    }

    /// Forward `buffer` to the host on [`flush_logs`](Self::flush_logs) and shutdown.
    #[must_use]
    pub fn with_log_buffer(mut self, buffer: LogBuffer) -> Self {
        self.logs = Some(buffer);
        self
    }

    // --- lifecycle -------------------------------------------------------

    /// Validate the host, fetch its config, hook the platform signal and
    /// prime connectivity.
    ///
    /// # Errors
    /// `InterfaceNotRegistered` if the host has no implementation,
    /// `AlreadyStarted` on a second call, otherwise the host error. A
    /// failed startup leaves the bridge stopped.
    pub async fn startup(&self) -> Result<()> {
        if !self.rpc.is_registered() {
            return Err(NativeAppError::InterfaceNotRegistered);
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(NativeAppError::AlreadyStarted);
        }

        if let Err(e) = self.start_inner().await {
            self.connectivity.unhook();
            self.started.store(false, Ordering::SeqCst);
            return Err(e);
        }
        tracing::info!(namespace = %self.config.event_namespace, "NativeApp started");
        Ok(())
    }

    async fn start_inner(&self) -> Result<()> {
        tracing::debug!("get_config");
        let remote = self.rpc.get_config().await?;
        self.app_config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .merge(remote);

        self.connectivity.hook();
        if let Some(status) = self.connectivity.platform_status() {
            self.connectivity
                .set_connectivity(ConnectivityOverrideSource::SystemSignal, status)
                .await?;
        }
        Ok(())
    }

    /// Unhook the platform signal and flush buffered log entries.
    ///
    /// # Errors
    /// `NotStarted` if not running; otherwise the host error from the
    /// flush. The bridge is stopped either way.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(NativeAppError::NotStarted("shutdown"));
        }
        self.connectivity.unhook();
        tracing::info!("NativeApp shutting down");

        if let Some(logs) = &self.logs {
            logs.flush(self.rpc.as_ref()).await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn ensure_started(&self, operation: &'static str) -> Result<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(NativeAppError::NotStarted(operation))
        }
    }

    // --- configuration and diagnostics ------------------------------------

    /// Snapshot of the app config.
    #[must_use]
    pub fn config(&self) -> AppConfig {
        self.app_config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub const fn bridge_config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Send buffered log entries to the host. Returns how many were sent.
    ///
    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn flush_logs(&self) -> Result<usize> {
        self.ensure_started("flush_logs")?;
        match &self.logs {
            Some(logs) => Ok(logs.flush(self.rpc.as_ref()).await?),
            None => Ok(0),
        }
    }

    // --- connectivity ----------------------------------------------------

    /// Ask the host for its current view, bypassing local state.
    ///
    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn check_internet_connectivity(&self) -> Result<ConnectivityStatus> {
        self.ensure_started("check_internet_connectivity")?;
        Ok(self.connectivity.check().await?)
    }

    /// Override connectivity on behalf of the user.
    ///
    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn override_internet_connectivity(&self, status: ConnectivityStatus) -> Result<()> {
        self.ensure_started("override_internet_connectivity")?;
        Ok(self
            .connectivity
            .set_connectivity(ConnectivityOverrideSource::UserOverride, status)
            .await?)
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Local connectivity status, notified on every actual change.
    #[must_use]
    pub fn connectivity(&self) -> watch::Receiver<ConnectivityStatus> {
        self.connectivity.subscribe()
    }

    #[must_use]
    pub fn on_memory_warning(&self) -> broadcast::Receiver<()> {
        self.relay.on_memory_warning()
    }

    /// Connectivity changes pushed by the host.
    #[must_use]
    pub fn on_internet_connectivity_changed(&self) -> broadcast::Receiver<ConnectivityStatus> {
        self.relay.on_connectivity_changed()
    }

    // --- briefcases ------------------------------------------------------

    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn download_briefcase(
        &self,
        context_id: &str,
        imodel_id: &str,
        version: &VersionSelector,
    ) -> Result<BriefcaseProps> {
        self.ensure_started("download_briefcase")?;
        Ok(self.briefcases.download(context_id, imodel_id, version).await?)
    }

    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn start_download_briefcase<F>(
        &self,
        context_id: &str,
        imodel_id: &str,
        version: &VersionSelector,
        on_progress: Option<F>,
    ) -> Result<DownloadToken>
    where
        F: Fn(ProgressInfo) + Send + Sync + 'static,
    {
        self.ensure_started("start_download_briefcase")?;
        Ok(self
            .briefcases
            .start_download(context_id, imodel_id, version, on_progress)
            .await?)
    }

    /// When not running the token is dropped, which stops progress delivery.
    ///
    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn finish_download_briefcase(&self, token: DownloadToken) -> Result<()> {
        self.ensure_started("finish_download_briefcase")?;
        Ok(self.briefcases.finish_download(token).await?)
    }

    /// Returns `false` if the download had already completed.
    ///
    /// When not running the token is dropped, which stops progress delivery.
    ///
    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn cancel_download_briefcase(&self, token: DownloadToken) -> Result<bool> {
        self.ensure_started("cancel_download_briefcase")?;
        Ok(self.briefcases.cancel_download(token).await?)
    }

    /// Last known state of the most recent download of `imodel_id`.
    #[must_use]
    pub fn download_state(&self, imodel_id: &str) -> Option<DownloadState> {
        self.briefcases.download_state(imodel_id)
    }

    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn open_briefcase(&self, props: &BriefcaseProps) -> Result<BriefcaseConnection> {
        self.ensure_started("open_briefcase")?;
        Ok(self.briefcases.open(props).await?)
    }

    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn close_briefcase(&self, props: &BriefcaseProps) -> Result<()> {
        self.ensure_started("close_briefcase")?;
        Ok(self.briefcases.close(props).await?)
    }

    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn delete_briefcase(&self, props: &BriefcaseProps) -> Result<()> {
        self.ensure_started("delete_briefcase")?;
        Ok(self.briefcases.delete(props).await?)
    }

    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn get_briefcases(&self) -> Result<Vec<LocalBriefcase>> {
        self.ensure_started("get_briefcases")?;
        Ok(self.briefcases.list().await?)
    }

    // --- storage ---------------------------------------------------------

    /// Open or create a named storage. Repeated opens share one handle.
    ///
    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn open_storage(&self, name: &str) -> Result<Arc<Storage>> {
        self.ensure_started("open_storage")?;
        self.storages.open(name).await
    }

    /// # Errors
    /// `NotStarted` if not running, `StorageNotFound` for an unregistered
    /// handle, otherwise the host error.
    pub async fn close_storage(&self, storage: &Storage, delete: bool) -> Result<()> {
        self.ensure_started("close_storage")?;
        self.storages.close(storage, delete).await
    }

    /// Every storage name known to the host.
    ///
    /// # Errors
    /// `NotStarted` if not running; otherwise the host error.
    pub async fn get_storage_names(&self) -> Result<Vec<String>> {
        self.ensure_started("get_storage_names")?;
        self.storages.names().await
    }
}
