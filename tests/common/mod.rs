use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use pointsgate::application::award::{AwardEngine, AwardRequest};
use pointsgate::application::reconcile::Reconciler;
use pointsgate::domain::activity::ActivitySource;
use pointsgate::gateway::auth::AuthService;
use pointsgate::gateway::dispatch::{CorsPolicy, Dispatcher};
use pointsgate::gateway::handlers::{GatewayServices, build_route_table};
use pointsgate::gateway::rate_limit::{RateLimiter, RateLimits};
use pointsgate::infrastructure::in_memory::InMemoryLedger;
use std::sync::Arc;
use std::time::Duration;

pub const ADMIN_TOKEN: &str = "test-admin-token";

pub struct TestStack {
    pub ledger: Arc<InMemoryLedger>,
    pub engine: Arc<AwardEngine>,
    pub reconciler: Arc<Reconciler>,
    pub auth: Arc<AuthService>,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn stack() -> TestStack {
    stack_with_limits(
        RateLimits {
            auth: 100,
            read: 100,
            write: 100,
            admin: 100,
        },
        Duration::from_secs(60),
    )
}

pub fn stack_with_limits(limits: RateLimits, window: Duration) -> TestStack {
    let ledger = Arc::new(InMemoryLedger::new());
    let auth = Arc::new(AuthService::new(
        "test-pepper".to_string(),
        Some(ADMIN_TOKEN.to_string()),
        3600,
    ));
    let engine = Arc::new(AwardEngine::new(ledger.clone(), ledger.clone()));
    let reconciler = Arc::new(Reconciler::new(ledger.clone(), ledger.clone()));

    let services = GatewayServices {
        auth: auth.clone(),
        engine: engine.clone(),
        reconciler: reconciler.clone(),
        cards: ledger.clone(),
        activities: ledger.clone(),
    };
    let table = Arc::new(build_route_table(&services).unwrap());
    let limiter = Arc::new(RateLimiter::new(window, limits));
    let dispatcher = Arc::new(Dispatcher::new(
        table,
        auth.clone(),
        limiter,
        CorsPolicy::default(),
    ));

    TestStack {
        ledger,
        engine,
        reconciler,
        auth,
        dispatcher,
    }
}

pub fn award(card_id: u64, delta: i64, reference: Option<&str>) -> AwardRequest {
    AwardRequest {
        card_id,
        delta,
        source: ActivitySource::Manual,
        description: "bonus".to_string(),
        transaction_ref: reference.map(str::to_string),
    }
}

pub fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
    headers
}
