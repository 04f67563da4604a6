//! In-memory native-app host.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use native_app_core::{
    BriefcaseProps, ConnectivityOverrideSource, ConnectivityStatus, EventHub, EventKey, EventKind,
    LocalBriefcase, LogEntry, NATIVE_APP_NAMESPACE, NativeAppRpc, RpcError, StorageValue,
    VersionSelector,
};
use serde_json::{Value, json};
use tokio::sync::watch;
use uuid::Uuid;

/// Size reported for every downloaded briefcase.
const BRIEFCASE_FILE_SIZE: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Complete,
    Cancelled,
}

struct HostDownload {
    props: BriefcaseProps,
    phase: watch::Sender<Phase>,
}

struct HostState {
    registered: bool,
    config: HashMap<String, Value>,
    connectivity: ConnectivityStatus,
    overrides: Vec<(ConnectivityOverrideSource, ConnectivityStatus)>,
    calls: Vec<&'static str>,
    failures: HashSet<&'static str>,
    fail_once: HashSet<&'static str>,
    latency: Option<Duration>,
    changesets: HashMap<String, Vec<String>>,
    named_versions: HashMap<(String, String), String>,
    manual_downloads: bool,
    downloads: HashMap<String, HostDownload>,
    briefcases: HashMap<String, LocalBriefcase>,
    open_briefcases: HashSet<String>,
    storages: HashMap<String, HashMap<String, StorageValue>>,
    open_storages: HashSet<String>,
    logged: Vec<LogEntry>,
}

/// Host stub keeping briefcases and storages in memory and pushing events
/// through an [`EventHub`].
///
/// Useful for development and tests. Every remote call is recorded.
/// Downloads complete immediately unless manual mode is enabled, in which
/// case they are driven with [`emit_progress`](Self::emit_progress) and
/// [`complete_download`](Self::complete_download).
pub struct MemoryHost {
    hub: Arc<EventHub>,
    namespace: String,
    state: Mutex<HostState>,
}

impl MemoryHost {
    /// Create a host publishing under the default namespace.
    #[must_use]
    pub fn new(hub: Arc<EventHub>) -> Self {
        Self::with_namespace(hub, NATIVE_APP_NAMESPACE)
    }

    #[must_use]
    pub fn with_namespace(hub: Arc<EventHub>, namespace: impl Into<String>) -> Self {
        Self {
            hub,
            namespace: namespace.into(),
            state: Mutex::new(HostState {
                registered: true,
                config: HashMap::new(),
                connectivity: ConnectivityStatus::Online,
                overrides: Vec::new(),
                calls: Vec::new(),
                failures: HashSet::new(),
                fail_once: HashSet::new(),
                latency: None,
                changesets: HashMap::new(),
                named_versions: HashMap::new(),
                manual_downloads: false,
                downloads: HashMap::new(),
                briefcases: HashMap::new(),
                open_briefcases: HashSet::new(),
                storages: HashMap::new(),
                open_storages: HashSet::new(),
                logged: Vec::new(),
            }),
        }
    }

    // --- setup -----------------------------------------------------------

    pub fn set_registered(&self, registered: bool) {
        self.state().registered = registered;
    }

    pub fn set_config(&self, key: impl Into<String>, value: Value) {
        self.state().config.insert(key.into(), value);
    }

    /// Delay every remote call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    /// Make every call to `operation` fail until cleared.
    pub fn fail_on(&self, operation: &'static str) {
        self.state().failures.insert(operation);
    }

    /// Make only the next call to `operation` fail.
    pub fn fail_next(&self, operation: &'static str) {
        self.state().fail_once.insert(operation);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failures.clear();
        state.fail_once.clear();
    }

    /// Changesets of a dataset, oldest first.
    pub fn set_changesets<I, S>(&self, imodel_id: &str, changesets: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state().changesets.insert(
            imodel_id.to_owned(),
            changesets.into_iter().map(Into::into).collect(),
        );
    }

    pub fn name_version(&self, imodel_id: &str, name: &str, changeset_id: &str) {
        self.state().named_versions.insert(
            (imodel_id.to_owned(), name.to_owned()),
            changeset_id.to_owned(),
        );
    }

    pub fn set_manual_downloads(&self, manual: bool) {
        self.state().manual_downloads = manual;
    }

    // --- host-side events ------------------------------------------------

    /// Change the host's connectivity view and push the change.
    pub fn set_host_connectivity(&self, status: ConnectivityStatus) {
        self.state().connectivity = status;
        self.hub.emit(
            &EventKey::new(self.namespace.clone(), EventKind::InternetConnectivityChanged),
            &json!({ "status": status }),
        );
    }

    pub fn emit_memory_warning(&self) {
        self.hub.emit(
            &EventKey::new(self.namespace.clone(), EventKind::MemoryWarning),
            &Value::Null,
        );
    }

    /// Push a progress sample for `imodel_id`. Returns the number of handlers reached.
    pub fn emit_progress(&self, imodel_id: &str, loaded: u64, total: Option<u64>) -> usize {
        self.hub.emit(
            &self.progress_key(imodel_id),
            &json!({ "progress": { "loaded": loaded, "total": total } }),
        )
    }

    /// Complete every running download of `imodel_id`. Returns whether any was running.
    pub fn complete_download(&self, imodel_id: &str) -> bool {
        let mut state = self.state();
        let keys: Vec<_> = state
            .downloads
            .iter()
            .filter(|(_, d)| {
                d.props.imodel_id == imodel_id && *d.phase.borrow() == Phase::Running
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            Self::complete(&mut state, key);
        }
        !keys.is_empty()
    }

    // --- inspection ------------------------------------------------------

    /// Every remote call received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    #[must_use]
    pub fn calls_to(&self, operation: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == operation).count()
    }

    #[must_use]
    pub fn connectivity_overrides(&self) -> Vec<(ConnectivityOverrideSource, ConnectivityStatus)> {
        self.state().overrides.clone()
    }

    #[must_use]
    pub fn logged(&self) -> Vec<LogEntry> {
        self.state().logged.clone()
    }

    /// Downloads begun but not yet finished or cancelled.
    #[must_use]
    pub fn pending_downloads(&self) -> usize {
        self.state().downloads.len()
    }

    /// Client handlers subscribed to progress for `imodel_id`.
    #[must_use]
    pub fn progress_listeners(&self, imodel_id: &str) -> usize {
        self.hub.listener_count(&self.progress_key(imodel_id))
    }

    // --- internals -------------------------------------------------------

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn progress_key(&self, imodel_id: &str) -> EventKey {
        EventKey::for_resource(
            self.namespace.clone(),
            EventKind::BriefcaseDownloadProgress,
            imodel_id,
        )
    }

    /// Record the call, apply latency, then fail if a failure is injected.
    async fn enter(&self, operation: &'static str) -> Result<(), RpcError> {
        let latency = {
            let mut state = self.state();
            state.calls.push(operation);
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let fail = {
            let mut state = self.state();
            state.failures.contains(operation) || state.fail_once.remove(operation)
        };
        if fail {
            return Err(RpcError::host(operation, "injected failure"));
        }
        Ok(())
    }

    fn complete(state: &mut HostState, key: &str) {
        let Some(download) = state.downloads.get(key) else {
            return;
        };
        download.phase.send_replace(Phase::Complete);
        let props = download.props.clone();
        state.briefcases.insert(
            key.to_owned(),
            LocalBriefcase {
                props,
                file_size: BRIEFCASE_FILE_SIZE,
            },
        );
    }

    /// Register a running download; completes it at once unless manual.
    fn begin(&self, request: &BriefcaseProps, report_progress: bool) -> BriefcaseProps {
        let mut props = request.clone();
        props.key = Uuid::new_v4().to_string();

        let auto_complete = {
            let mut state = self.state();
            let (phase, _) = watch::channel(Phase::Running);
            state.downloads.insert(
                props.key.clone(),
                HostDownload {
                    props: props.clone(),
                    phase,
                },
            );
            !state.manual_downloads
        };

        if auto_complete {
            if report_progress {
                let size = BRIEFCASE_FILE_SIZE;
                self.emit_progress(&props.imodel_id, size, Some(size));
            }
            Self::complete(&mut self.state(), &props.key);
        }
        props
    }

    /// Wait for the download under `key` to leave `Running`, then forget it.
    async fn join(&self, operation: &'static str, key: &str) -> Result<(), RpcError> {
        let mut rx = self
            .state()
            .downloads
            .get(key)
            .map(|d| d.phase.subscribe())
            .ok_or_else(|| RpcError::NotFound(format!("download {key}")))?;

        let phase = *rx
            .wait_for(|p| *p != Phase::Running)
            .await
            .map_err(|_| RpcError::host(operation, "download abandoned"))?;

        self.state().downloads.remove(key);
        match phase {
            Phase::Cancelled => Err(RpcError::host(operation, "download was cancelled")),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl NativeAppRpc for MemoryHost {
    fn is_registered(&self) -> bool {
        self.state().registered
    }

    async fn get_config(&self) -> Result<HashMap<String, Value>, RpcError> {
        self.enter("get_config").await?;
        Ok(self.state().config.clone())
    }

    async fn log_messages(&self, entries: Vec<LogEntry>) -> Result<(), RpcError> {
        self.enter("log_messages").await?;
        self.state().logged.extend(entries);
        Ok(())
    }

    async fn override_connectivity(
        &self,
        by: ConnectivityOverrideSource,
        status: ConnectivityStatus,
    ) -> Result<(), RpcError> {
        self.enter("override_connectivity").await?;
        let mut state = self.state();
        state.overrides.push((by, status));
        state.connectivity = status;
        Ok(())
    }

    async fn check_connectivity(&self) -> Result<ConnectivityStatus, RpcError> {
        self.enter("check_connectivity").await?;
        Ok(self.state().connectivity)
    }

    async fn resolve_version(
        &self,
        imodel_id: &str,
        selector: &VersionSelector,
    ) -> Result<String, RpcError> {
        self.enter("resolve_version").await?;
        let state = self.state();
        let known = state.changesets.get(imodel_id);
        match selector {
            VersionSelector::First => Ok(String::new()),
            VersionSelector::Latest => {
                Ok(known.and_then(|c| c.last()).cloned().unwrap_or_default())
            }
            VersionSelector::AsOfChangeSet(id) => known
                .filter(|c| c.contains(id))
                .map(|_| id.clone())
                .ok_or_else(|| RpcError::NotFound(format!("changeset {id}"))),
            VersionSelector::Named(name) => state
                .named_versions
                .get(&(imodel_id.to_owned(), name.clone()))
                .cloned()
                .ok_or_else(|| RpcError::NotFound(format!("named version {name}"))),
        }
    }

    async fn download_briefcase(
        &self,
        props: &BriefcaseProps,
    ) -> Result<BriefcaseProps, RpcError> {
        self.enter("download_briefcase").await?;
        let props = self.begin(props, false);
        self.join("download_briefcase", &props.key).await?;
        Ok(props)
    }

    async fn start_download_briefcase(
        &self,
        props: &BriefcaseProps,
        report_progress: bool,
    ) -> Result<BriefcaseProps, RpcError> {
        self.enter("start_download_briefcase").await?;
        Ok(self.begin(props, report_progress))
    }

    async fn finish_download_briefcase(&self, props: &BriefcaseProps) -> Result<(), RpcError> {
        self.enter("finish_download_briefcase").await?;
        self.join("finish_download_briefcase", &props.key).await
    }

    async fn cancel_download_briefcase(&self, props: &BriefcaseProps) -> Result<bool, RpcError> {
        self.enter("cancel_download_briefcase").await?;
        let mut state = self.state();
        let Some(download) = state.downloads.get(&props.key) else {
            return Ok(false);
        };
        if *download.phase.borrow() != Phase::Running {
            return Ok(false);
        }
        download.phase.send_replace(Phase::Cancelled);
        state.downloads.remove(&props.key);
        Ok(true)
    }

    async fn delete_briefcase(&self, props: &BriefcaseProps) -> Result<(), RpcError> {
        self.enter("delete_briefcase").await?;
        let mut state = self.state();
        state.open_briefcases.remove(&props.key);
        state
            .briefcases
            .remove(&props.key)
            .map(|_| ())
            .ok_or_else(|| RpcError::NotFound(format!("briefcase {}", props.key)))
    }

    async fn open_briefcase(&self, props: &BriefcaseProps) -> Result<BriefcaseProps, RpcError> {
        self.enter("open_briefcase").await?;
        let mut state = self.state();
        let cached = state
            .briefcases
            .get(&props.key)
            .ok_or_else(|| RpcError::NotFound(format!("briefcase {}", props.key)))?;

        let mut opened = BriefcaseProps::default();
        opened.set_metadata("name", Value::from(cached.props.imodel_id.clone()));
        opened.set_metadata("fileSize", Value::from(cached.file_size));
        state.open_briefcases.insert(props.key.clone());
        Ok(opened)
    }

    async fn close_briefcase(&self, props: &BriefcaseProps) -> Result<(), RpcError> {
        self.enter("close_briefcase").await?;
        if self.state().open_briefcases.remove(&props.key) {
            Ok(())
        } else {
            Err(RpcError::NotFound(format!("open briefcase {}", props.key)))
        }
    }

    async fn get_briefcases(&self) -> Result<Vec<LocalBriefcase>, RpcError> {
        self.enter("get_briefcases").await?;
        let mut briefcases: Vec<_> = self.state().briefcases.values().cloned().collect();
        briefcases.sort_by(|a, b| a.props.imodel_id.cmp(&b.props.imodel_id));
        Ok(briefcases)
    }

    async fn storage_open(&self, name: &str) -> Result<String, RpcError> {
        self.enter("storage_open").await?;
        let mut state = self.state();
        state.storages.entry(name.to_owned()).or_default();
        state.open_storages.insert(name.to_owned());
        Ok(name.to_owned())
    }

    async fn storage_close(&self, id: &str, delete: bool) -> Result<(), RpcError> {
        self.enter("storage_close").await?;
        let mut state = self.state();
        if !state.open_storages.remove(id) {
            return Err(RpcError::NotFound(format!("storage {id}")));
        }
        if delete {
            state.storages.remove(id);
        }
        Ok(())
    }

    async fn storage_names(&self) -> Result<Vec<String>, RpcError> {
        self.enter("storage_names").await?;
        let mut names: Vec<_> = self.state().storages.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn storage_get(&self, id: &str, key: &str) -> Result<Option<StorageValue>, RpcError> {
        self.enter("storage_get").await?;
        let state = self.state();
        Ok(open_storage(&state, id)?.get(key).cloned())
    }

    async fn storage_set(&self, id: &str, key: &str, value: StorageValue) -> Result<(), RpcError> {
        self.enter("storage_set").await?;
        let mut state = self.state();
        open_storage(&state, id)?;
        state
            .storages
            .entry(id.to_owned())
            .or_default()
            .insert(key.to_owned(), value);
        Ok(())
    }

    async fn storage_keys(&self, id: &str) -> Result<Vec<String>, RpcError> {
        self.enter("storage_keys").await?;
        let state = self.state();
        let mut keys: Vec<_> = open_storage(&state, id)?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn storage_remove_all(&self, id: &str) -> Result<(), RpcError> {
        self.enter("storage_remove_all").await?;
        let mut state = self.state();
        open_storage(&state, id)?;
        if let Some(values) = state.storages.get_mut(id) {
            values.clear();
        }
        Ok(())
    }
}

fn open_storage<'a>(
    state: &'a HostState,
    id: &str,
) -> Result<&'a HashMap<String, StorageValue>, RpcError> {
    state
        .storages
        .get(id)
        .filter(|_| state.open_storages.contains(id))
        .ok_or_else(|| RpcError::NotFound(format!("open storage {id}")))
}
