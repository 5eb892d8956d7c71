// Background retention: prune metric and NAS rows past retention_days every prune_interval_secs.
// VACUUM runs on an optional cron schedule (local time). Stops when the shutdown channel fires.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::store::MetricStore;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub prune_interval_secs: u64,
    /// Cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). None disables VACUUM.
    pub vacuum_schedule: Option<String>,
}

pub fn spawn(
    store: Arc<MetricStore>,
    config: RetentionConfig,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(store, config, shutdown_rx).await;
    })
}

#[instrument(skip(store, shutdown_rx), fields(interval_secs = config.prune_interval_secs))]
async fn run(
    store: Arc<MetricStore>,
    config: RetentionConfig,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let mut prune_interval =
        tokio::time::interval(Duration::from_secs(config.prune_interval_secs.max(1)));
    prune_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (vacuum_tx, mut vacuum_rx) = tokio::sync::mpsc::channel::<()>(1);
    let scheduler = config
        .vacuum_schedule
        .clone()
        .map(|schedule| tokio::spawn(vacuum_scheduler(schedule, vacuum_tx)));

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("retention worker stopping");
                break;
            }
            _ = prune_interval.tick() => {
                if let Err(e) = run_one_tick(&store).await {
                    warn!(error = %e, "prune tick failed");
                }
            }
            Some(()) = vacuum_rx.recv() => {
                if let Err(e) = store.vacuum().await {
                    warn!(error = %e, "vacuum failed");
                } else {
                    info!("vacuum complete");
                }
            }
        }
    }
    if let Some(handle) = scheduler {
        handle.abort();
    }
}

/// Sends on `tx` at each cron fire time.
async fn vacuum_scheduler(cron_str: String, tx: tokio::sync::mpsc::Sender<()>) {
    let Ok(schedule) = cron::Schedule::from_str(&cron_str) else {
        warn!(cron = %cron_str, "invalid vacuum_schedule; VACUUM will not run");
        return;
    };
    loop {
        let now = chrono::Local::now();
        if let Some(next) = schedule.after(&now).next() {
            let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
            tokio::time::sleep(delay).await;
            if tx.send(()).await.is_err() {
                break;
            }
        } else {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

/// One prune pass over both metric tables. Returns rows removed.
pub async fn run_one_tick(store: &MetricStore) -> anyhow::Result<u64> {
    let removed = store.prune_old_data().await?;
    if removed > 0 {
        info!(rows = removed, "pruned expired metric rows");
    }
    Ok(removed)
}
