//! menucraft API server

use std::sync::Arc;
use std::time::Duration;

use menucraft_api::{router, ApiConfig, AppState};
use menucraft_billing::BillingService;
use menucraft_crm::CrmService;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing::info;

async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting menucraft API");

    let pool = create_db_pool().await?;

    let billing = Arc::new(
        BillingService::from_env(pool.clone())
            .map_err(|e| anyhow::anyhow!("billing init failed: {}", e))?,
    );
    let crm = Arc::new(
        CrmService::from_env(billing.clone())
            .map_err(|e| anyhow::anyhow!("crm init failed: {}", e))?,
    );

    let config = ApiConfig::from_env();
    let state = AppState {
        pool,
        config: config.clone(),
        billing,
        crm,
    };

    let app = router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
