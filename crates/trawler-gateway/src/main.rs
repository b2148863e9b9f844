use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

mod admin;
mod app;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trawler=info,trawler_gateway=info".into()),
        )
        .init();

    let config_path = std::env::var("TRAWLER_CONFIG").ok();
    let config = trawler_core::TrawlerConfig::load(config_path.as_deref())?;

    let bind = config.webhook.bind.clone();
    let port = config.webhook.port;

    // Everything heavy happens here: store/cache connections, interactive
    // sign-in for unauthorized sessions, worker pools, update pumps.
    let app = app::Orchestrator::boot(config).await?;
    let router = http::build_router(Arc::clone(&app.ctx));

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("trawler gateway listening on {addr}");

    let shutdown = app.shutdown_signal();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let mut shutdown = shutdown;
        let _ = shutdown.changed().await;
    });

    tokio::select! {
        result = server => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    app.shutdown().await;
    Ok(())
}
