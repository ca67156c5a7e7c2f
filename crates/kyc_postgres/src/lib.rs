//! PostgreSQL adapter for kyc_core.
//!
//! Implements every storage port over one `PgPool`. Schema lives in
//! `migrations/` and is applied by [`run_migrations`].

pub mod store;
mod sqlx_types;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use store::pg_stores;

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    tracing::info!(max_connections, "connected to KYC database");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("KYC schema migrations applied");
    Ok(())
}
