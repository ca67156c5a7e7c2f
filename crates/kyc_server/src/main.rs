//! kyc_server — REST server for KYC onboarding.
//!
//! Configuration is read from the environment (and `.env`); see
//! [`kyc_server::config`]. Without `KYC_DATABASE_URL` the server runs on
//! in-memory stores seeded with demo roles.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use kyc_core::memory::MemoryStore;
use kyc_core::otp::LogOnlyDelivery;
use kyc_core::KycServices;
use kyc_server::config::ServerConfig;
use kyc_server::middleware::jwt::JwtConfig;
use kyc_server::router::build_router;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kyc_server=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let stores = match &config.database_url {
        Some(url) => {
            let pool = kyc_postgres::connect(url, config.db_max_connections).await?;
            kyc_postgres::run_migrations(&pool).await?;
            tracing::info!("Connected to database, migrations applied");
            kyc_postgres::pg_stores(pool)
        }
        None => {
            tracing::warn!("KYC_DATABASE_URL not set, using in-memory stores with demo roles");
            Arc::new(MemoryStore::with_demo_roles().await).stores()
        }
    };

    let services = Arc::new(KycServices::new(
        stores,
        Arc::new(LogOnlyDelivery),
        config.settings.clone(),
    ));
    let app = build_router(services, JwtConfig::from_secret(config.jwt_secret.as_bytes()));

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("kyc_server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;
    Ok(())
}
