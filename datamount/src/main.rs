use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;

use datamount::api;
use datamount::config::Config;
use datamount::utils::cli::Args;
use datamount::utils::logging::init_tracing;
use datamount::utils::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = Config::from_args(&args).await?;
    let state = Arc::new(AppState::new(config)?);

    state
        .service
        .start_init_mounts(state.config.init_mounts.clone())
        .await;

    let app = api::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", state.config.host, state.config.port)).await?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if state.config.unmount_on_shutdown {
        info!("Unmounting all mounts ...");
        state.service.shutdown().await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down...");
}
