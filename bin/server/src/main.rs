use concierge_routing::{Engine, travel_table};
use concierge_server::{
    config::ServerConfig,
    db::PgCheckpointStore,
    remote::{RemoteAssistant, RemoteDirectory, RemoteTools, http_client},
    routes,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env()?;
    tracing::info!("Loaded configuration");

    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&db_pool).await?;

    let client = http_client(config.request_timeout())?;
    let engine = Engine::new(
        travel_table()?,
        PgCheckpointStore::new(db_pool),
        Arc::new(RemoteAssistant::new(client.clone(), &config.assistant_url)),
        Arc::new(RemoteTools::new(client.clone(), &config.tools_url)),
        Arc::new(RemoteDirectory::new(client, &config.identity_url)),
    )
    .with_config(config.engine.to_engine_config());

    let app = routes::router(Arc::new(engine)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
