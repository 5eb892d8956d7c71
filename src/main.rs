use anyhow::Result;
use nasmon::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    let sample_timeout = Duration::from_millis(app_config.sampling.timeout_ms);
    let ping_timeout = Duration::from_millis(app_config.nas.ping_timeout_ms);

    let store = Arc::new(
        store::MetricStore::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
            app_config.database.retention_days,
        )
        .await?,
    );
    store.init().await?;

    let requests = session::RequestCounter::new();
    let session = Arc::new(session::DeltaSession::new(session::SessionDeps {
        reader: counters::detect(&PathBuf::from(&app_config.sampling.volume)),
        host: Arc::new(host::HostRepo::new()),
        store: store.clone(),
        requests: requests.clone(),
        latency: probes::LatencyProbe::new(ping_timeout),
        latency_target: app_config.sampling.latency_target.clone(),
        timeout: sample_timeout,
    }));

    let mount_point = PathBuf::from(&app_config.nas.mount_point);
    let nas_latency_target = app_config
        .nas
        .latency_target
        .as_deref()
        .map(|target| probes::resolve_target(target, &mount_point));
    if let Some(target) = &nas_latency_target {
        tracing::info!(target = %target, "nas latency target");
    }
    let users = Arc::new(users::ConcurrentUserEstimator::new(
        store.clone(),
        users::detect_share_sessions(app_config.users.share_port),
        Duration::from_secs(app_config.users.active_window_secs),
        users::TtlCache::new(Duration::from_secs(app_config.users.cache_ttl_secs)),
        sample_timeout,
    ));
    let io_timeout = Duration::from_millis(app_config.nas.io_timeout_ms);
    let mut storage = probes::StorageIoProbe::new(
        mount_point.clone(),
        (app_config.nas.throughput_block_mb as usize) * 1024 * 1024,
        app_config.nas.iops_operations,
        app_config.nas.iops_block_size,
        io_timeout,
        sample_timeout,
    );
    if !app_config.nas.require_mount {
        tracing::warn!(mount_point = %mount_point.display(), "mount check disabled, probing the directory as is");
        storage = storage.allow_unmounted();
    }
    let nas = Arc::new(nas::NasMonitor::new(nas::NasDeps {
        store: store.clone(),
        users,
        latency: probes::LatencyProbe::new(ping_timeout),
        latency_target: nas_latency_target,
        storage,
        capacity: probes::CapacityProbe::new(sample_timeout),
        share_name: app_config.nas.share_name.clone(),
        file_count_limit: app_config.nas.file_count_limit,
        timeout: io_timeout,
    }));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let retention_handle = retention_worker::spawn(
        store.clone(),
        retention_worker::RetentionConfig {
            prune_interval_secs: app_config.database.prune_interval_secs,
            vacuum_schedule: app_config.database.vacuum_schedule.clone(),
        },
        shutdown_rx,
    );

    let app = routes::app(routes::AppState {
        session,
        nas,
        store,
        requests,
    });
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(_) => {
                        let _ = tokio::signal::ctrl_c().await;
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
        } => {
            tracing::info!("Received shutdown signal");
            let _ = shutdown_tx.send(());
            let _ = retention_handle.await;
        }
    }

    Ok(())
}
