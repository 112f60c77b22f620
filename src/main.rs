use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_uploader::{
    api,
    config::{Config, RemoteBackend},
    control::ControlPlane,
    discovery::{discovery_channels, Discoverer, DiscoveryQueues},
    remote::{HttpRemote, LocalRemote, MediaApi, TransferEndpoint},
    scheduler::{Scheduler, UploadSummary},
    storage::{DirectoryRecord, Store, StoreError},
    uploader::FileUploader,
    watch::WatchManager,
    AppState,
};

const CONTROLLER_QUEUE: usize = 64;

type SchedulerTask = JoinHandle<Result<UploadSummary, StoreError>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "media-uploader starting");

    let config = Config::load()?;
    info!(environment = %config.agent.environment, "Loaded configuration");

    let store = Store::open(config.state_file())?;
    info!(path = %store.path().display(), "State store opened");

    let mut settings = store.settings();
    if config.apply_overrides(&mut settings) {
        info!(?settings, "Applying configured upload settings");
        store.update_settings(|current| *current = settings);
        store.save()?;
    }

    let (media, transfer): (Arc<dyn MediaApi>, Arc<dyn TransferEndpoint>) =
        match config.remote.backend {
            RemoteBackend::Http => {
                let token = config
                    .remote
                    .access_token
                    .as_deref()
                    .context("ACCESS_TOKEN validated in config")?;
                let remote = Arc::new(HttpRemote::new(
                    &config.remote.api_host,
                    &config.remote.transfer_host,
                    token,
                )?);
                info!(api = %config.remote.api_host, "Using HTTP remote");
                (remote.clone() as Arc<dyn MediaApi>, remote as Arc<dyn TransferEndpoint>)
            }
            RemoteBackend::Local => {
                let remote = Arc::new(LocalRemote::new(&config.remote.local_path)?);
                info!(path = %config.remote.local_path, "Using local remote");
                (remote.clone() as Arc<dyn MediaApi>, remote as Arc<dyn TransferEndpoint>)
            }
        };

    let (queues, inputs) = discovery_channels();
    let uploader = Arc::new(FileUploader::new(store.clone(), media, transfer));
    let scheduler = Scheduler::new(uploader, config.uploads.concurrent_uploads);
    let scheduler_task: SchedulerTask = tokio::spawn(scheduler.run(inputs));

    match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => run_once(config, store, queues, scheduler_task, path).await,
        None => serve(config, store, queues, scheduler_task).await,
    }
}

/// Upload (or watch) a single path, then exit.
async fn run_once(
    config: Config,
    store: Store,
    queues: DiscoveryQueues,
    scheduler_task: SchedulerTask,
    path: PathBuf,
) -> anyhow::Result<()> {
    let path = std::path::absolute(&path)?;
    let discoverer = Discoverer::new(store.clone(), queues.direct.clone());
    let watches = WatchManager::new(store.clone(), queues.watch.clone());
    drop(queues);

    if config.uploads.watch {
        let mut dir = store
            .get_directory(&path)
            .unwrap_or_else(|| DirectoryRecord::new(&path));
        dir.watch = true;
        dir.missing_on_filesystem = false;
        let recursive = dir.recursive;
        store.set_directory(dir);
        watches.reconcile().await;
        store.save()?;

        let queued = discoverer.queue_directory(&path, recursive).await?;
        info!(path = %path.display(), queued, "Watching directory until interrupted");
        shutdown_signal().await;
        watches.stop_all().await;
    } else {
        let queued = discoverer.queue_path(&path).await?;
        info!(path = %path.display(), queued, "Queued for upload");
    }

    drop(discoverer);
    drop(watches);
    finish(store, scheduler_task).await
}

/// Serve the control surface until a shutdown signal.
async fn serve(
    config: Config,
    store: Store,
    queues: DiscoveryQueues,
    mut scheduler_task: SchedulerTask,
) -> anyhow::Result<()> {
    let discoverer = Discoverer::new(store.clone(), queues.direct.clone());
    let watches = Arc::new(WatchManager::new(store.clone(), queues.watch.clone()));
    drop(queues);

    let control = Arc::new(ControlPlane::new(
        store.clone(),
        Arc::clone(&watches),
        discoverer.clone(),
    ));
    let (commands, controller_task) = control.register_controller(CONTROLLER_QUEUE)?;

    watches.reconcile().await;
    let startup = {
        let discoverer = discoverer.clone();
        tokio::spawn(async move {
            let queued = discoverer.queue_watched_directories().await;
            info!(queued, "Queued watched directories");
        })
    };

    let state = Arc::new(AppState {
        config: config.clone(),
        store: store.clone(),
        commands,
    });

    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.agent.bind_address).await?;
    info!("Listening on: {}", config.agent.bind_address);

    let events = store.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Replacing the observer ends any open event stream.
            drop(events.register_observer());
        })
        .into_future();
    tokio::select! {
        result = server => result?,
        stopped = &mut scheduler_task => {
            stopped??;
            anyhow::bail!("Upload scheduler stopped unexpectedly");
        }
    }

    info!("Shutting down background tasks");
    startup.abort();
    drop(state);
    if let Err(e) = controller_task.await {
        tracing::error!(error = %e, "Controller task failed");
    }

    watches.stop_all().await;
    drop(control);
    drop(watches);
    drop(discoverer);

    finish(store, scheduler_task).await
}

/// Wait for in-flight uploads once every discovery source is gone, then save.
async fn finish(store: Store, scheduler_task: SchedulerTask) -> anyhow::Result<()> {
    let summary = scheduler_task.await??;
    info!(
        uploaded = summary.uploaded,
        deduplicated = summary.deduplicated,
        skipped = summary.skipped,
        rejected = summary.rejected,
        errored = summary.errored,
        "Uploads finished"
    );

    store.save()?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining uploads");
}
