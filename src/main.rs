mod config;
mod envelope;
mod routes;
mod services;
mod state;

use std::future::IntoFuture;
use std::process::ExitCode;

use tokio::net::TcpListener;

#[derive(Debug, thiserror::Error)]
enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "boardrelay stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), ServerError> {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!(error = %e, "no .env file loaded");
    }

    let config = config::Config::from_env();
    let objects = services::persistence::load_snapshot(&config.snapshot_path);
    tracing::info!(
        path = %config.snapshot_path.display(),
        objects = objects.len(),
        "scene restored"
    );

    let http_addr = format!("{}:{}", config.bind_addr, config.http_port);
    let ws_addr = format!("{}:{}", config.bind_addr, config.ws_port);
    let state = state::AppState::new(config, objects);

    let _monitor = services::heartbeat::spawn_liveness_monitor(state.clone());

    let http_listener = bind(&http_addr).await?;
    let ws_listener = bind(&ws_addr).await?;
    tracing::info!(%http_addr, %ws_addr, "boardrelay listening");

    let http = axum::serve(http_listener, routes::control_app(state.clone()))
        .with_graceful_shutdown(shutdown_signal("http"))
        .into_future();
    let ws = axum::serve(ws_listener, routes::relay_app(state))
        .with_graceful_shutdown(shutdown_signal("ws"))
        .into_future();

    tokio::try_join!(http, ws)?;
    tracing::info!("boardrelay shut down");
    Ok(())
}

async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })
}

async fn shutdown_signal(listener: &'static str) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(listener, "shutdown requested"),
        Err(e) => {
            tracing::warn!(listener, error = %e, "failed to listen for ctrl-c; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
