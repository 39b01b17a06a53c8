use std::{process, sync::Arc};

use blobcache::{
    application::error::AppError,
    cache::{BlobStore, CacheCoordinator, CachePolicy, CacheState, MemoryBlobStore},
    config::{self, StorageBackend},
    infra::{
        blob_fs::FsBlobStore,
        error::InfraError,
        http::{self, UpstreamClient},
        telemetry,
    },
};
use tokio::try_join;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = build_blob_store(&settings.storage)?;
    let policy = CachePolicy::new(settings.cache.clone());
    let coordinator = Arc::new(CacheCoordinator::new(
        store,
        policy,
        settings.storage.container.clone(),
    ));
    let cache = CacheState::new(coordinator);
    let upstream = UpstreamClient::new(&settings.upstream)?;

    info!(
        public_addr = %settings.server.public_addr,
        admin_addr = %settings.server.admin_addr,
        origin = %upstream.origin(),
        cache_enabled = settings.cache.enabled,
        container = %settings.storage.container,
        "starting blobcache"
    );

    serve_http(&settings, cache, upstream).await
}

fn build_blob_store(storage: &config::StorageSettings) -> Result<Arc<dyn BlobStore>, AppError> {
    match storage.backend {
        StorageBackend::Memory => {
            warn!("using in-memory blob store; cached pages are lost on restart");
            Ok(Arc::new(MemoryBlobStore::new()))
        }
        StorageBackend::Filesystem => {
            let store = FsBlobStore::new(&storage.directory, &storage.account_name).map_err(
                |err| {
                    AppError::from(InfraError::configuration(format!(
                        "failed to open blob directory `{}`: {err}",
                        storage.directory.display()
                    )))
                },
            )?;
            info!(root = %store.root().display(), "using filesystem blob store");
            Ok(Arc::new(store))
        }
    }
}

async fn serve_http(
    settings: &config::Settings,
    cache: CacheState,
    upstream: UpstreamClient,
) -> Result<(), AppError> {
    let public_router = http::build_router(cache.clone(), upstream);
    let admin_router = http::build_admin_router(cache);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let graceful_shutdown = settings.server.graceful_shutdown;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(
                timeout_secs = graceful_shutdown.as_secs(),
                "shutdown requested, draining connections"
            );
        }
        let _ = shutdown_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));

    let servers = async {
        try_join!(public_server, admin_server)
            .map_err(|err| AppError::unexpected(format!("server error: {err}")))
    };

    let mut drain_rx = shutdown_rx;
    tokio::select! {
        result = servers => result.map(|_| ()),
        _ = async {
            let _ = drain_rx.wait_for(|stop| *stop).await;
            tokio::time::sleep(graceful_shutdown).await;
        } => {
            warn!("graceful shutdown timed out");
            Ok(())
        }
    }
}

async fn wait_for_shutdown(mut rx: tokio::sync::watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
