//! Session bridge between a client app and its native host.
//!
//! Provides:
//! - `NativeApp` - Startup guard and public facade
//! - `ConnectivityTracker` - Online/offline state with platform hooking
//! - `EventRelay` - Local fan-out of host-pushed events
//! - `DownloadManager` / `BriefcaseClient` - Briefcase download and lifecycle
//! - `StorageCache` - Named key/value storages, one handle per name
//! - `LogBuffer` - Forwarding of `tracing` events to the host
//! - `MemoryHost` - In-memory host (feature `memory`)

pub mod app;
pub mod briefcase;
pub mod connectivity;
pub mod download;
pub mod error;
pub mod host;
pub mod logging;
pub mod relay;
pub mod storage;

pub use app::NativeApp;
pub use briefcase::{BriefcaseClient, BriefcaseConnection};
pub use connectivity::{ChannelSignal, ConnectivitySignal, ConnectivityTracker, NoSignal};
pub use download::{DownloadManager, DownloadState, DownloadToken};
pub use error::{NativeAppError, Result};
#[cfg(feature = "memory")]
pub use host::MemoryHost;
pub use logging::{HostLogLayer, LogBuffer};
pub use relay::EventRelay;
pub use storage::{Storage, StorageCache};
