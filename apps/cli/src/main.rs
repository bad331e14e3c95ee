mod args;
mod config;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use args::Command;
use http_api::HttpState;
use reconcile::{ChannelPublisher, LogPublisher};
use usage_app::{AppState, ensure_store_dirs, setup_catalog_fixture};

const TRIGGER_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = args::parse_args().map_err(|err| {
        eprintln!("{err}");
        args::print_help();
        io::Error::new(io::ErrorKind::InvalidInput, "invalid arguments")
    })?;

    usage_app::logging::init(&args.log_level)?;

    let loaded = config::load_or_create(args.config).map_err(io::Error::other)?;
    if loaded.created {
        tracing::info!(path = %loaded.file.display(), "wrote default config");
    } else {
        tracing::debug!(path = %loaded.file.display(), "loaded config");
    }
    let config = loaded.config;

    match args.command {
        Command::Serve { port } => serve(config, port).await?,
        Command::InitCatalog => {
            ensure_store_dirs(&config)?;
            setup_catalog_fixture(&config.catalog.path)?;
            println!("Catalog schema ready at {}", config.catalog.path.display());
        }
        command => run_once(config, command).await?,
    }
    Ok(())
}

async fn serve(
    config: usage_app::AppConfig,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let port = port.unwrap_or(config.http.port);
    let (publisher, receiver) = ChannelPublisher::channel(TRIGGER_QUEUE_CAPACITY);
    let app_state = AppState::new(config, Arc::new(publisher))?;
    app_state.initialize()?;

    let worker = tokio::spawn(app_state.dispatcher().run(receiver));

    let router = http_api::router(HttpState::new(app_state.clone()));
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    tracing::info!(port = listener.local_addr()?.port(), "data usage api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.abort();
    app_state.close();
    tracing::info!("shut down");
    Ok(())
}

async fn run_once(
    config: usage_app::AppConfig,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let app_state = AppState::new(config, Arc::new(LogPublisher))?;
    app_state.initialize()?;
    let services = &app_state.services;

    let output = match command {
        Command::ReconcileUser { username } => {
            serde_json::to_string_pretty(&services.reconcile.user(&username).await?)?
        }
        Command::ReconcileBatch { start, end } => {
            serde_json::to_string_pretty(&services.reconcile.batch(&start, &end).await?)?
        }
        Command::Partition { batch_size } => {
            serde_json::to_string_pretty(&services.reconcile.partition(batch_size).await?)?
        }
        Command::Current { username } => {
            serde_json::to_string_pretty(&services.usage.current(&username).await?)?
        }
        Command::Serve { .. } | Command::InitCatalog => return Ok(()),
    };
    println!("{output}");
    app_state.close();
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
