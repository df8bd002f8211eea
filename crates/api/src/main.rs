use anyhow::Context;

use docintel_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    docintel_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let (app, services) = docintel_api::app::build_app(&config)
        .await
        .context("failed to initialise services")?;

    match services.documents.recover().await {
        Ok(0) => {}
        Ok(resumed) => tracing::info!(resumed, "resumed unfinished jobs"),
        Err(e) => tracing::error!(error = %e, "job recovery failed"),
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
