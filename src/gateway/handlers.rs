use crate::application::award::{AwardEngine, AwardRequest};
use crate::application::reconcile::Reconciler;
use crate::domain::ports::{SharedActivityStore, SharedCardStore};
use crate::error::{Error, Result};
use crate::gateway::auth::AuthService;
use crate::gateway::route::{
    AuthLevel, RateClass, RequestContext, RouteHandler, RouteTable,
};
use async_trait::async_trait;
use axum::http::Method;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Everything the logical handlers need, wired once at startup.
pub struct GatewayServices {
    pub auth: Arc<AuthService>,
    pub engine: Arc<AwardEngine>,
    pub reconciler: Arc<Reconciler>,
    pub cards: SharedCardStore,
    pub activities: SharedActivityStore,
}

/// Declares the full logical surface.
///
/// Declaration order is match order; keep specific patterns ahead of any
/// overlapping captures.
pub fn build_route_table(services: &GatewayServices) -> Result<RouteTable> {
    RouteTable::builder()
        .route(
            Method::POST,
            "/auth/register",
            AuthLevel::Public,
            RateClass::Auth,
            Arc::new(RegisterHandler {
                auth: services.auth.clone(),
            }),
        )
        .route(
            Method::POST,
            "/auth/login",
            AuthLevel::Public,
            RateClass::Auth,
            Arc::new(LoginHandler {
                auth: services.auth.clone(),
            }),
        )
        .route(
            Method::POST,
            "/businesses/award-points",
            AuthLevel::Customer,
            RateClass::Write,
            Arc::new(AwardHandler {
                engine: services.engine.clone(),
                privileged: false,
            }),
        )
        .route(
            Method::POST,
            "/internal/award-points",
            AuthLevel::Admin,
            RateClass::Admin,
            Arc::new(AwardHandler {
                engine: services.engine.clone(),
                privileged: true,
            }),
        )
        .route(
            Method::POST,
            "/enrollments",
            AuthLevel::Customer,
            RateClass::Write,
            Arc::new(EnrollHandler {
                reconciler: services.reconciler.clone(),
            }),
        )
        .route(
            Method::POST,
            "/enrollments/{id}/approve",
            AuthLevel::Admin,
            RateClass::Admin,
            Arc::new(ApproveHandler {
                reconciler: services.reconciler.clone(),
            }),
        )
        .route(
            Method::POST,
            "/enrollments/{id}/decline",
            AuthLevel::Admin,
            RateClass::Admin,
            Arc::new(DeclineHandler {
                reconciler: services.reconciler.clone(),
            }),
        )
        .route(
            Method::GET,
            "/cards/{id}",
            AuthLevel::Customer,
            RateClass::Read,
            Arc::new(CardHandler {
                cards: services.cards.clone(),
            }),
        )
        .route(
            Method::GET,
            "/cards/{id}/activities",
            AuthLevel::Customer,
            RateClass::Read,
            Arc::new(CardActivitiesHandler {
                cards: services.cards.clone(),
                activities: services.activities.clone(),
            }),
        )
        .route(
            Method::GET,
            "/business/{id}/cards",
            AuthLevel::Customer,
            RateClass::Read,
            Arc::new(ProgramCardsHandler {
                cards: services.cards.clone(),
            }),
        )
        .route(
            Method::GET,
            "/admin/orphans",
            AuthLevel::Admin,
            RateClass::Admin,
            Arc::new(OrphansHandler {
                reconciler: services.reconciler.clone(),
            }),
        )
        .route(
            Method::POST,
            "/admin/reconcile",
            AuthLevel::Admin,
            RateClass::Admin,
            Arc::new(ReconcileHandler {
                reconciler: services.reconciler.clone(),
            }),
        )
        .route(
            Method::GET,
            "/admin/analytics/summary",
            AuthLevel::Admin,
            RateClass::Admin,
            Arc::new(SummaryHandler {
                cards: services.cards.clone(),
                activities: services.activities.clone(),
            }),
        )
        .build()
}

struct RegisterHandler {
    auth: Arc<AuthService>,
}

#[derive(Deserialize)]
struct CredentialPayload {
    email: String,
    password: String,
}

#[async_trait]
impl RouteHandler for RegisterHandler {
    async fn handle(&self, ctx: RequestContext) -> Result<Value> {
        let payload: CredentialPayload = ctx.json()?;
        let customer_id = self.auth.register(&payload.email, &payload.password).await?;
        Ok(json!({ "customer_id": customer_id }))
    }
}

struct LoginHandler {
    auth: Arc<AuthService>,
}

#[async_trait]
impl RouteHandler for LoginHandler {
    async fn handle(&self, ctx: RequestContext) -> Result<Value> {
        let payload: CredentialPayload = ctx.json()?;
        let session = self.auth.login(&payload.email, &payload.password).await?;
        Ok(serde_json::to_value(session)?)
    }
}

struct AwardHandler {
    engine: Arc<AwardEngine>,
    /// The internal direct variant may use correction/test sources.
    privileged: bool,
}

#[async_trait]
impl RouteHandler for AwardHandler {
    async fn handle(&self, ctx: RequestContext) -> Result<Value> {
        let request: AwardRequest = ctx.json()?;
        if !self.privileged && request.source.is_privileged() {
            return Err(Error::InvalidInput(format!(
                "source '{}' is reserved for the internal award endpoint",
                request.source
            )));
        }
        let receipt = self.engine.award(request).await?;
        Ok(serde_json::to_value(receipt)?)
    }
}

struct EnrollHandler {
    reconciler: Arc<Reconciler>,
}

#[derive(Deserialize)]
struct EnrollPayload {
    program_id: u64,
    #[serde(default)]
    customer_id: Option<u64>,
}

#[async_trait]
impl RouteHandler for EnrollHandler {
    async fn handle(&self, ctx: RequestContext) -> Result<Value> {
        let payload: EnrollPayload = ctx.json()?;
        let principal = ctx.principal()?;

        let customer_id = match payload.customer_id {
            Some(id) if principal.owns_customer(id) => id,
            Some(_) => return Err(Error::Forbidden),
            None => principal.customer_id.ok_or_else(|| {
                Error::InvalidInput("customer_id is required for admin enrollments".to_string())
            })?,
        };

        let enrollment = self
            .reconciler
            .enroll(customer_id, payload.program_id)
            .await?;
        Ok(serde_json::to_value(enrollment)?)
    }
}

struct ApproveHandler {
    reconciler: Arc<Reconciler>,
}

#[async_trait]
impl RouteHandler for ApproveHandler {
    async fn handle(&self, ctx: RequestContext) -> Result<Value> {
        let enrollment_id = ctx.params.require_u64("id")?;
        let card_id = self.reconciler.approve(enrollment_id).await?;
        Ok(json!({ "enrollment_id": enrollment_id, "card_id": card_id }))
    }
}

struct DeclineHandler {
    reconciler: Arc<Reconciler>,
}

#[async_trait]
impl RouteHandler for DeclineHandler {
    async fn handle(&self, ctx: RequestContext) -> Result<Value> {
        let enrollment_id = ctx.params.require_u64("id")?;
        let enrollment = self.reconciler.decline(enrollment_id).await?;
        Ok(serde_json::to_value(enrollment)?)
    }
}

struct CardHandler {
    cards: SharedCardStore,
}

#[async_trait]
impl RouteHandler for CardHandler {
    async fn handle(&self, ctx: RequestContext) -> Result<Value> {
        let card_id = ctx.params.require_u64("id")?;
        let card = self
            .cards
            .card(card_id)
            .await?
            .ok_or(Error::CardNotFound(card_id))?;
        if !ctx.principal()?.owns_customer(card.customer_id) {
            return Err(Error::Forbidden);
        }
        Ok(serde_json::to_value(card)?)
    }
}

struct CardActivitiesHandler {
    cards: SharedCardStore,
    activities: SharedActivityStore,
}

#[async_trait]
impl RouteHandler for CardActivitiesHandler {
    async fn handle(&self, ctx: RequestContext) -> Result<Value> {
        let card_id = ctx.params.require_u64("id")?;
        let card = self
            .cards
            .card(card_id)
            .await?
            .ok_or(Error::CardNotFound(card_id))?;
        if !ctx.principal()?.owns_customer(card.customer_id) {
            return Err(Error::Forbidden);
        }
        let activities = self.activities.activities_for_card(card_id).await?;
        Ok(json!({
            "card_id": card_id,
            "balance": card.points,
            "activities": activities,
        }))
    }
}

struct ProgramCardsHandler {
    cards: SharedCardStore,
}

#[async_trait]
impl RouteHandler for ProgramCardsHandler {
    async fn handle(&self, ctx: RequestContext) -> Result<Value> {
        let program_id = ctx.params.require_u64("id")?;
        let principal = ctx.principal()?;
        let cards = self.cards.cards_for_program(program_id).await?;

        // Customers only see their own cards in the program listing.
        let visible: Vec<_> = cards
            .into_iter()
            .filter(|card| principal.owns_customer(card.customer_id))
            .collect();
        Ok(json!({ "program_id": program_id, "cards": visible }))
    }
}

struct OrphansHandler {
    reconciler: Arc<Reconciler>,
}

#[async_trait]
impl RouteHandler for OrphansHandler {
    async fn handle(&self, _ctx: RequestContext) -> Result<Value> {
        let orphans = self.reconciler.orphaned_enrollments().await?;
        Ok(json!({ "orphaned_enrollments": orphans }))
    }
}

struct ReconcileHandler {
    reconciler: Arc<Reconciler>,
}

#[async_trait]
impl RouteHandler for ReconcileHandler {
    async fn handle(&self, _ctx: RequestContext) -> Result<Value> {
        let report = self.reconciler.repair_all().await?;
        Ok(serde_json::to_value(report)?)
    }
}

struct SummaryHandler {
    cards: SharedCardStore,
    activities: SharedActivityStore,
}

#[async_trait]
impl RouteHandler for SummaryHandler {
    async fn handle(&self, _ctx: RequestContext) -> Result<Value> {
        let cards = self.cards.card_totals().await?;
        let activities = self.activities.activity_totals().await?;
        Ok(json!({ "cards": cards, "activities": activities }))
    }
}
