//! Briefcase lifecycle: download, open, close, delete, enumerate.

use std::sync::Arc;

use native_app_core::{
    BriefcaseProps, LocalBriefcase, NativeAppRpc, ProgressInfo, RpcError, VersionSelector,
};

use crate::download::{DownloadManager, DownloadState, DownloadToken};

/// An opened local copy of a briefcase.
#[derive(Debug, Clone, PartialEq)]
pub struct BriefcaseConnection {
    props: BriefcaseProps,
}

impl BriefcaseConnection {
    /// Full identity: the host's open result overlaid with the caller's props.
    #[must_use]
    pub const fn props(&self) -> &BriefcaseProps {
        &self.props
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.props.key
    }

    #[must_use]
    pub fn imodel_id(&self) -> &str {
        &self.props.imodel_id
    }

    /// Display name reported by the host, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.props.get_metadata("name").and_then(|v| v.as_str())
    }
}

/// Orchestrates downloads and the direct briefcase operations.
pub struct BriefcaseClient {
    rpc: Arc<dyn NativeAppRpc>,
    downloads: DownloadManager,
}

impl BriefcaseClient {
    #[must_use]
    pub const fn new(rpc: Arc<dyn NativeAppRpc>, downloads: DownloadManager) -> Self {
        Self { rpc, downloads }
    }

    #[must_use]
    pub const fn downloads(&self) -> &DownloadManager {
        &self.downloads
    }

    /// # Errors
    /// Returns the resolution or download error unchanged.
    pub async fn download(
        &self,
        context_id: &str,
        imodel_id: &str,
        version: &VersionSelector,
    ) -> Result<BriefcaseProps, RpcError> {
        self.downloads.download(context_id, imodel_id, version).await
    }

    /// # Errors
    /// Returns the resolution or begin error unchanged.
    pub async fn start_download<F>(
        &self,
        context_id: &str,
        imodel_id: &str,
        version: &VersionSelector,
        on_progress: Option<F>,
    ) -> Result<DownloadToken, RpcError>
    where
        F: Fn(ProgressInfo) + Send + Sync + 'static,
    {
        self.downloads
            .start(context_id, imodel_id, version, on_progress)
            .await
    }

    /// # Errors
    /// Returns the host error unchanged.
    pub async fn finish_download(&self, token: DownloadToken) -> Result<(), RpcError> {
        self.downloads.finish(token).await
    }

    /// # Errors
    /// Returns the host error unchanged.
    pub async fn cancel_download(&self, token: DownloadToken) -> Result<bool, RpcError> {
        self.downloads.cancel(token).await
    }

    #[must_use]
    pub fn download_state(&self, imodel_id: &str) -> Option<DownloadState> {
        self.downloads.state(imodel_id)
    }

    /// Open a downloaded copy.
    ///
    /// # Errors
    /// Returns the host error unchanged.
    pub async fn open(&self, props: &BriefcaseProps) -> Result<BriefcaseConnection, RpcError> {
        tracing::debug!(key = %props.key, "open_briefcase");
        let opened = self.rpc.open_briefcase(props).await?;
        Ok(BriefcaseConnection {
            props: opened.overlaid_with(props),
        })
    }

    /// # Errors
    /// Returns the host error unchanged.
    pub async fn close(&self, props: &BriefcaseProps) -> Result<(), RpcError> {
        tracing::debug!(key = %props.key, "close_briefcase");
        self.rpc.close_briefcase(props).await
    }

    /// Permanently delete a downloaded copy, dropping its finished download state.
    ///
    /// # Errors
    /// Returns the host error unchanged.
    pub async fn delete(&self, props: &BriefcaseProps) -> Result<(), RpcError> {
        tracing::debug!(key = %props.key, "delete_briefcase");
        self.rpc.delete_briefcase(props).await?;
        self.downloads.forget(&props.imodel_id);
        Ok(())
    }

    /// Copies in the host's local cache.
    ///
    /// # Errors
    /// Returns the host error unchanged.
    pub async fn list(&self) -> Result<Vec<LocalBriefcase>, RpcError> {
        tracing::debug!("get_briefcases");
        self.rpc.get_briefcases().await
    }
}
