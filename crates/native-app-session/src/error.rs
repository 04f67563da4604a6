//! Session bridge error.

use native_app_core::RpcError;

/// Errors surfaced by the session bridge.
///
/// Everything except [`NativeAppError::Rpc`] is raised locally, before any
/// remote call is made.
#[derive(Debug, thiserror::Error)]
pub enum NativeAppError {
    #[error("NativeAppRpc interface must be registered")]
    InterfaceNotRegistered,
    #[error("NativeApp is already started")]
    AlreadyStarted,
    #[error("Call NativeApp::startup() before calling {0}")]
    NotStarted(&'static str),
    #[error("Storage [Id={0}] not found")]
    StorageNotFound(String),
    #[error("Storage [Id={0}] is not open")]
    StorageNotOpen(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl NativeAppError {
    /// Whether the error was raised before reaching the host.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        !matches!(self, Self::Rpc(_))
    }
}

pub type Result<T, E = NativeAppError> = std::result::Result<T, E>;
