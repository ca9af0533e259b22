use std::sync::Arc;

use clap::Parser;
use corundum::config::Config;
use corundum::db::store::PostgresResourceStore;
use corundum::services::bulk;
use corundum::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "fhir-server", about = "FHIR R4 document server")]
struct Args {
    /// Override the listen port from configuration.
    #[arg(long)]
    port: Option<u16>,

    /// Skip running database migrations on startup.
    #[arg(long)]
    no_migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::load()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let config = Arc::new(config);

    let _log_guard = corundum::logging::init(&config.logging);

    let store =
        PostgresResourceStore::connect(&config.database.url, config.database.max_connections)
            .await?;
    if !args.no_migrate {
        store.run_migrations().await?;
    }

    let state = AppState::new(config.clone(), store);
    let worker = bulk::spawn_workers(state.bulk.clone(), config.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "fhir-server listening");

    axum::serve(listener, corundum::api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.abort();
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
