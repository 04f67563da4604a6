//! The remote interface the session bridge drives.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    BriefcaseProps, ConnectivityOverrideSource, ConnectivityStatus, LocalBriefcase, StorageValue,
    VersionSelector,
};

/// Remote call error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("{operation} failed: {message}")]
    Host {
        operation: &'static str,
        message: String,
    },
    #[error("Not found: {0}")]
    NotFound(String),
}

impl RpcError {
    /// Host-side failure of `operation`.
    #[must_use]
    pub fn host(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Host {
            operation,
            message: message.into(),
        }
    }
}

/// Severity of a forwarded log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

/// Client log entry forwarded to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix epoch milliseconds.
    pub timestamp: i64,
    pub level: LogLevel,
    pub category: String,
    pub message: String,
}

/// Remote operations exposed by the native-app host.
///
/// The host is authoritative for every call. Implementations do not retry.
#[async_trait]
pub trait NativeAppRpc: Send + Sync {
    /// Whether the interface is registered with the transport.
    fn is_registered(&self) -> bool {
        true
    }

    /// Configuration the host wants merged into the client's.
    async fn get_config(&self) -> Result<HashMap<String, Value>, RpcError>;

    /// Forward buffered client log entries.
    async fn log_messages(&self, entries: Vec<LogEntry>) -> Result<(), RpcError>;

    /// Tell the host the connectivity status and who set it.
    async fn override_connectivity(
        &self,
        by: ConnectivityOverrideSource,
        status: ConnectivityStatus,
    ) -> Result<(), RpcError>;

    /// The host's own connectivity view.
    async fn check_connectivity(&self) -> Result<ConnectivityStatus, RpcError>;

    /// Resolve a version selector to a concrete changeset id.
    async fn resolve_version(
        &self,
        imodel_id: &str,
        selector: &VersionSelector,
    ) -> Result<String, RpcError>;

    /// Download a briefcase, completing when the download does.
    async fn download_briefcase(&self, props: &BriefcaseProps)
    -> Result<BriefcaseProps, RpcError>;

    /// Begin a download; progress events are pushed when `report_progress` is set.
    async fn start_download_briefcase(
        &self,
        props: &BriefcaseProps,
        report_progress: bool,
    ) -> Result<BriefcaseProps, RpcError>;

    /// Wait for a started download to complete.
    async fn finish_download_briefcase(&self, props: &BriefcaseProps) -> Result<(), RpcError>;

    /// Cancel a started download. `false` if it had already completed.
    async fn cancel_download_briefcase(&self, props: &BriefcaseProps) -> Result<bool, RpcError>;

    async fn delete_briefcase(&self, props: &BriefcaseProps) -> Result<(), RpcError>;

    /// Open a downloaded briefcase; the result may omit identity fields.
    async fn open_briefcase(&self, props: &BriefcaseProps) -> Result<BriefcaseProps, RpcError>;

    async fn close_briefcase(&self, props: &BriefcaseProps) -> Result<(), RpcError>;

    /// Briefcases present in the host's local cache.
    async fn get_briefcases(&self) -> Result<Vec<LocalBriefcase>, RpcError>;

    /// Open or create a named storage, returning its id.
    async fn storage_open(&self, name: &str) -> Result<String, RpcError>;

    async fn storage_close(&self, id: &str, delete: bool) -> Result<(), RpcError>;

    /// Names of every storage the host knows about.
    async fn storage_names(&self) -> Result<Vec<String>, RpcError>;

    async fn storage_get(&self, id: &str, key: &str) -> Result<Option<StorageValue>, RpcError>;

    async fn storage_set(&self, id: &str, key: &str, value: StorageValue) -> Result<(), RpcError>;

    async fn storage_keys(&self, id: &str) -> Result<Vec<String>, RpcError>;

    async fn storage_remove_all(&self, id: &str) -> Result<(), RpcError>;
}
