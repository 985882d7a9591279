use clap::Parser;
use miette::{IntoDiagnostic, Result};
use pointsgate::application::award::AwardEngine;
use pointsgate::application::reconcile::Reconciler;
use pointsgate::config::Config;
use pointsgate::domain::ports::{SharedActivityStore, SharedCardStore, SharedEnrollmentStore};
use pointsgate::gateway::auth::AuthService;
use pointsgate::gateway::dispatch::{CorsPolicy, Dispatcher};
use pointsgate::gateway::handlers::{GatewayServices, build_route_table};
use pointsgate::gateway::http;
use pointsgate::gateway::rate_limit::RateLimiter;
use pointsgate::infrastructure::in_memory::InMemoryLedger;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (cards, activities, enrollments) = build_stores(&config).into_diagnostic()?;

    let auth = Arc::new(AuthService::new(
        config.token_secret.clone(),
        config.admin_token.clone(),
        config.token_ttl_secs,
    ));
    let engine = Arc::new(AwardEngine::new(cards.clone(), activities.clone()));
    let reconciler = Arc::new(Reconciler::new(cards.clone(), enrollments.clone()));

    let services = GatewayServices {
        auth: auth.clone(),
        engine,
        reconciler,
        cards,
        activities,
    };
    let table = Arc::new(build_route_table(&services).into_diagnostic()?);

    let limiter = Arc::new(RateLimiter::new(config.rate_window(), config.rate_limits()));
    let dispatcher = Arc::new(Dispatcher::new(
        table,
        auth,
        limiter,
        CorsPolicy {
            allow_origin: config.cors_origin.clone(),
        },
    ));

    let app = http::router(dispatcher, config.max_body_bytes);
    http::serve(config.bind, app).await.into_diagnostic()?;

    Ok(())
}

fn build_stores(
    config: &Config,
) -> pointsgate::error::Result<(SharedCardStore, SharedActivityStore, SharedEnrollmentStore)> {
    match &config.db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let ledger = pointsgate::infrastructure::rocksdb::RocksDbLedger::open(path)?;
            Ok((
                Arc::new(ledger.clone()),
                Arc::new(ledger.clone()),
                Arc::new(ledger),
            ))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => Err(pointsgate::error::Error::InvalidInput(
            "--db-path requires a build with the storage-rocksdb feature".to_string(),
        )),
        None => {
            let ledger = InMemoryLedger::new();
            Ok((
                Arc::new(ledger.clone()),
                Arc::new(ledger.clone()),
                Arc::new(ledger),
            ))
        }
    }
}
