//! Core types and host interfaces for the native app session bridge.
//!
//! This crate provides the shared vocabulary:
//! - `NativeAppRpc` - Remote operations the bridge drives
//! - `EventSource` / `EventHub` - Typed push-event subscription
//! - `BriefcaseProps`, `VersionSelector`, `StorageValue`, connectivity enums
//! - `BridgeConfig` and host-supplied `AppConfig`

pub mod config;
pub mod connectivity;
pub mod event_hub;
pub mod events;
pub mod props;
pub mod traits;
pub mod value;

pub use config::{AppConfig, BridgeConfig};
pub use connectivity::{ConnectivityOverrideSource, ConnectivityStatus};
pub use event_hub::EventHub;
pub use events::{
    EventHandler, EventKey, EventKind, EventSource, NATIVE_APP_NAMESPACE, ProgressInfo,
    Subscription,
};
pub use props::{BriefcaseProps, LocalBriefcase, VersionSelector};
pub use traits::{LogEntry, LogLevel, NativeAppRpc, RpcError};
pub use value::StorageValue;
