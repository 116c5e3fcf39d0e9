use std::sync::Arc;

use anyhow::Context;

use shrinkray_api::app::{build_app, build_services, default_transcoder};
use shrinkray_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shrinkray_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let bind_addr = config.bind_addr;

    let transcoder = default_transcoder(&config);
    let services = Arc::new(build_services(config, transcoder));
    let app = build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    let on_signal = services.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutdown requested");
            on_signal.request_shutdown();
        })
        .await
        .context("server error")?;

    services.shutdown().await;
    tracing::info!("shutdown complete");
    Ok(())
}
