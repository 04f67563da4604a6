//! Walks the session bridge through its flows against an in-memory host.
//!
//! Run with: cargo run -p offline-demo
//!
//! Set `RUST_LOG=debug` to see every remote call.

use std::{sync::Arc, time::Duration};

use native_app_core::{
    AppConfig, BridgeConfig, ConnectivityStatus, EventHub, StorageValue, VersionSelector,
};
use native_app_session::{ChannelSignal, LogBuffer, MemoryHost, NativeApp};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const IMODEL: &str = "bridge-model";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BridgeConfig::default();
    let logs = LogBuffer::new(config.log_buffer_capacity);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(logs.layer())
        .init();

    let hub = Arc::new(EventHub::new());
    let host = Arc::new(MemoryHost::new(hub.clone()));
    host.set_config("serviceUrl", Value::from("https://hub.example.invalid"));
    host.set_changesets(IMODEL, ["cs-1", "cs-2", "cs-3"]);
    host.name_version(IMODEL, "release", "cs-2");
    host.set_manual_downloads(true);

    let mut tap = hub.tap();
    tokio::spawn(async move {
        while let Ok((key, payload)) = tap.recv().await {
            tracing::debug!(%key, %payload, "host event");
        }
    });

    let signal = Arc::new(ChannelSignal::new(Some(ConnectivityStatus::Online)));
    let mut defaults = AppConfig::new();
    defaults.set("theme", Value::from("light"));
    let app = NativeApp::new(host.clone(), hub, signal.clone(), config)
        .with_defaults(defaults)
        .with_log_buffer(logs.clone());

    app.startup().await?;
    tracing::info!(
        service = app.config().get_str("serviceUrl").unwrap_or("-"),
        theme = app.config().get_str("theme").unwrap_or("-"),
        "host configuration"
    );

    connectivity(&app, &signal).await?;
    briefcases(&app, &host).await?;
    storage(&app).await?;

    let pending = logs.len();
    app.shutdown().await?;
    tracing::info!(pending, forwarded = host.logged().len(), "log entries sent to host");
    Ok(())
}

async fn connectivity(app: &NativeApp, signal: &ChannelSignal) -> anyhow::Result<()> {
    let mut status = app.connectivity();

    signal.offline();
    tokio::time::timeout(Duration::from_secs(1), status.changed()).await??;
    tracing::info!(online = app.is_online(), "platform went offline");

    app.override_internet_connectivity(ConnectivityStatus::Online)
        .await?;
    let host_view = app.check_internet_connectivity().await?;
    tracing::info!(?host_view, "user forced online");
    Ok(())
}

async fn briefcases(app: &NativeApp, host: &Arc<MemoryHost>) -> anyhow::Result<()> {
    let token = app
        .start_download_briefcase(
            "demo-project",
            IMODEL,
            &VersionSelector::named("release"),
            Some(|progress: native_app_core::ProgressInfo| {
                tracing::info!(
                    loaded = progress.loaded,
                    percent = progress.percent().unwrap_or_default(),
                    "download progress"
                );
            }),
        )
        .await?;
    tracing::info!(
        key = %token.props().key,
        changeset = %token.props().changeset_id,
        "download started"
    );

    let driver = {
        let host = Arc::clone(host);
        tokio::spawn(async move {
            for step in 1..=4_u64 {
                host.emit_progress(IMODEL, step * 256, Some(1024));
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            host.complete_download(IMODEL)
        })
    };
    app.finish_download_briefcase(token).await?;
    driver.await?;
    tracing::info!(state = ?app.download_state(IMODEL), "download finished");

    host.set_manual_downloads(false);
    let latest = app
        .download_briefcase("demo-project", IMODEL, &VersionSelector::Latest)
        .await?;
    tracing::info!(changeset = %latest.changeset_id, "one-shot download finished");

    for local in app.get_briefcases().await? {
        let connection = app.open_briefcase(&local.props).await?;
        tracing::info!(
            name = connection.name().unwrap_or("-"),
            changeset = %connection.props().changeset_id,
            size = local.file_size,
            "opened briefcase"
        );
        app.close_briefcase(connection.props()).await?;
        app.delete_briefcase(&local.props).await?;
    }
    Ok(())
}

async fn storage(app: &NativeApp) -> anyhow::Result<()> {
    let prefs = app.open_storage("prefs").await?;
    prefs.set("theme", "dark").await?;
    prefs.set("launches", 3_i64).await?;
    prefs.set("avatar", StorageValue::Blob(vec![0x89, 0x50, 0x4e, 0x47])).await?;

    for key in prefs.keys().await? {
        let value = prefs.get(&key).await?;
        tracing::info!(%key, value = %serde_json::to_string(&value)?, "stored");
    }

    let again = app.open_storage("prefs").await?;
    tracing::info!(same_handle = Arc::ptr_eq(&prefs, &again), "reopened prefs");

    prefs.close().await?;
    tracing::info!(names = ?app.get_storage_names().await?, "storages on host");
    Ok(())
}
