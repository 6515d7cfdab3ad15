use numblr_core::config::Config;
use numblr_core::engine::Engine;

/// Boots the aggregation/caching engine and its background refresher.
///
/// This binary has no HTTP surface of its own: the request handlers, HTML
/// templating, and per-source scraping this engine serves are external
/// collaborators that embed this crate as a library and call
/// [`Engine::handle_request`] directly.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "numblr_core=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(cache_path = %config.cache_path, "starting numblr-core engine");

    let mut engine = Engine::new(config).await?;
    engine.spawn_refresher();
    tracing::info!("background refresher started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    Ok(())
}
