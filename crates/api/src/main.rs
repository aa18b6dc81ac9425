use anyhow::Context;

use meterlab_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    meterlab_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let (app, services) = meterlab_api::app::build_app(&config)
        .await
        .context("failed to wire services")?;

    let sweeper = match config.lease_sweep {
        Some(interval) => Some(
            services
                .spawn_sweeper(interval)
                .context("failed to spawn lease sweeper")?,
        ),
        None => None,
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        environment = %config.environment,
        backend = services.backend.as_str(),
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown();
    }
    Ok(())
}
