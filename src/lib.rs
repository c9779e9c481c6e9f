pub mod core;
pub mod error;
pub mod models;

pub use crate::core::{EventTap, StatsPresenter, StatsStore};
pub use error::{Error, Result};

use anyhow::Context;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const LOGGED_TOP_KEYS: usize = 5;

/// Runs retention cleanup now and then once a day until cancelled.
fn spawn_retention(
    store: StatsStore,
    retain_days: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let store = store.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || store.cleanup(retain_days)).await {
                tracing::warn!(error = %e, "retention cleanup task failed");
            }
        }
    })
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}

/// Headless entry point: loads settings, opens the store, starts keyboard monitoring and
/// keeps a statistics snapshot fresh until Ctrl-C.
pub fn run() -> anyhow::Result<()> {
    let base_dir = core::persistence::default_data_dir()?;
    // Reported once logging is up.
    let (settings, settings_error) = match core::persistence::load_or_init(&base_dir) {
        Ok(settings) => (settings, None),
        Err(e) => (models::Settings::default(), Some(e)),
    };
    let data_dir = settings.data_dir.clone().unwrap_or(base_dir);

    let _log_guard = core::app_log::init(&core::app_log::log_dir(&data_dir), &settings)
        .context("initializing logging")?;
    core::app_log::install_panic_hook();
    tracing::info!(data_dir = %data_dir.display(), "startup");
    if let Some(e) = settings_error {
        tracing::warn!(error = %e, "settings unavailable, using defaults");
    }

    let db_path = settings.database_path(&data_dir);
    let store = StatsStore::open_or_in_memory(&db_path).context("opening stats store")?;

    let tap = EventTap::new(store.clone(), settings.queue_capacity);
    if let Err(e) = tap.start() {
        // Statistics stay readable without monitoring.
        tracing::warn!(error = %e, "continuing without keyboard monitoring");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building async runtime")?;

    runtime.block_on(async {
        let cancel = CancellationToken::new();
        let retention = settings
            .retain_days
            .map(|days| spawn_retention(store.clone(), days, cancel.child_token()));

        let presenter = StatsPresenter::new(store.clone()).with_top_n(settings.top_n);
        let (mut snapshots, poller) = presenter.spawn_polling(
            settings.default_range,
            Duration::from_millis(settings.poll_interval_ms),
            cancel.child_token(),
        );
        let signal = tokio::spawn(shutdown_signal(cancel.clone()));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    let top: Vec<String> = snapshot
                        .entries
                        .iter()
                        .filter(|e| e.count > 0)
                        .take(LOGGED_TOP_KEYS)
                        .map(|e| format!("{}={}", e.key_name, e.count))
                        .collect();
                    tracing::debug!(range = ?snapshot.range, total = snapshot.total, top = ?top, "stats updated");
                }
            }
        }

        cancel.cancel();
        if let Err(e) = poller.await {
            tracing::warn!(error = %e, "stats polling task failed");
        }
        if let Some(retention) = retention {
            if let Err(e) = retention.await {
                tracing::warn!(error = %e, "retention task failed");
            }
        }
        if let Err(e) = signal.await {
            tracing::warn!(error = %e, "signal task failed");
        }
    });

    tap.stop();
    tracing::info!("shutdown");
    Ok(())
}
