use std::sync::Arc;

use anyhow::Context;

use dispensary_api::app::{build_app, services::AppServices};
use dispensary_infra::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dispensary_observability::init();

    let config = EngineConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(AppServices::new(config.retry));
    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        max_attempts = config.retry.max_attempts,
        "listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
