use std::{process, sync::Arc, time::Duration};

use forge_pages::{
    application::{
        error::AppError,
        service::{PagesOptions, PagesService},
    },
    cache::{AliasRegistry, AliasTable},
    config,
    infra::{
        error::InfraError,
        gitea::GiteaProvider,
        http::{self, ErrorPages, PagesState},
        telemetry,
    },
};
use tokio::{signal, sync::watch, task::JoinHandle};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Check(_) => run_check(settings).await,
    }
}

async fn run_check(settings: config::Settings) -> Result<(), AppError> {
    let provider = GiteaProvider::new(&settings.upstream)?;
    let version = provider.server_version().await?;
    info!(
        server = %settings.upstream.server,
        version = %version,
        domain = %settings.pages.domain,
        "Upstream reachable"
    );
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let provider = Arc::new(GiteaProvider::new(&settings.upstream)?);
    let shared_aliases = Arc::new(AliasTable::new());
    let aliases = Arc::new(open_aliases(&settings.pages, &shared_aliases).await?);
    let errors = Arc::new(ErrorPages::load(&settings.errors).await?);

    let service = PagesService::new(PagesOptions::from(&settings), provider, aliases);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let janitor = spawn_janitor(
        service.clone(),
        settings.cache.refresh,
        shutdown_rx.clone(),
    );

    let router = http::build_router(PagesState { service, errors });
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        addr = %settings.server.addr,
        domain = %settings.pages.domain,
        branch = %settings.pages.branch,
        "Serving pages"
    );

    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    let result = match tokio::time::timeout(settings.server.graceful_shutdown, server).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) => Err(AppError::from(InfraError::from(err))),
        Ok(Err(err)) => Err(AppError::unexpected(format!("server task failed: {err}"))),
        Err(_) => {
            warn!(
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "Graceful shutdown timed out"
            );
            Ok(())
        }
    };

    let _ = janitor.await;
    info!("Shut down");
    result
}

/// `shared` is mirrored into when `pages.shared_alias` is set.
async fn open_aliases(
    pages: &config::PagesSettings,
    shared: &Arc<AliasTable>,
) -> Result<AliasRegistry, AppError> {
    let registry = match pages.alias_file.as_ref() {
        Some(path) => AliasRegistry::open(path).await?,
        None => AliasRegistry::in_memory(),
    };
    Ok(if pages.shared_alias {
        registry.with_shared(Arc::clone(shared))
    } else {
        registry
    })
}

/// Periodically drop expired cache entries until shutdown.
fn spawn_janitor(
    service: PagesService,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let purged = service.purge_expired();
                    if purged > 0 {
                        debug!(purged, "Purged expired cache entries");
                    }
                }
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}
