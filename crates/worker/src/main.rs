//! menucraft Background Worker
//!
//! Handles scheduled maintenance:
//! - Checkout link expiry sweep (hourly) - resolution regenerates expired
//!   links lazily, the sweep just keeps stored statuses honest
//! - Billing invariant checks (daily at 03:30 UTC)

use std::sync::Arc;
use std::time::Duration;

use menucraft_billing::InvariantChecker;
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

/// Flip time-expired links that still claim to be active.
async fn sweep_expired_links(pool: &sqlx::PgPool) {
    let result = sqlx::query(
        r#"
        UPDATE checkout_links
        SET status = 'expired', updated_at = NOW()
        WHERE status = 'active' AND expires_at < NOW()
        "#,
    )
    .execute(pool)
    .await;

    match result {
        Ok(done) => {
            let swept = done.rows_affected();
            if swept > 0 {
                info!(swept = swept, "Marked expired checkout links");
            }
        }
        Err(e) => error!(error = %e, "Checkout link sweep failed"),
    }
}

async fn run_invariant_checks(pool: &sqlx::PgPool) {
    let checker = InvariantChecker::new(pool.clone());
    match checker.run_all_checks().await {
        Ok(summary) => {
            if summary.healthy {
                info!(checks_run = summary.checks_run, "Billing invariants healthy");
            } else {
                for violation in &summary.violations {
                    warn!(
                        invariant = %violation.invariant,
                        severity = %violation.severity,
                        description = %violation.description,
                        "Billing invariant violation"
                    );
                }
            }
        }
        Err(e) => error!(error = %e, "Invariant check run failed"),
    }
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

    info!("Starting menucraft Worker");

    let pool = create_db_pool().await?;

    let scheduler = JobScheduler::new().await?;

    // Job 1: link expiry sweep, hourly at :10
    let sweep_pool = Arc::new(pool.clone());
    scheduler
        .add(Job::new_async("0 10 * * * *", move |_uuid, _l| {
            let pool = sweep_pool.clone();
            Box::pin(async move {
                sweep_expired_links(&pool).await;
            })
        })?)
        .await?;
    info!("Scheduled: checkout link expiry sweep (hourly)");

    // Job 2: invariant checks, daily at 03:30 UTC
    let invariant_pool = Arc::new(pool.clone());
    scheduler
        .add(Job::new_async("0 30 3 * * *", move |_uuid, _l| {
            let pool = invariant_pool.clone();
            Box::pin(async move {
                info!("Running scheduled billing invariant checks");
                run_invariant_checks(&pool).await;
            })
        })?)
        .await?;
    info!("Scheduled: billing invariant checks (daily)");

    scheduler.start().await?;

    // Keep the process alive; jobs run on the scheduler's tasks.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        info!("Worker heartbeat");
    }
}
