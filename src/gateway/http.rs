use crate::error::{Error, Result};
use crate::gateway::dispatch::{Dispatcher, GatewayResponse};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// The physical deployment surface: a handful of prefix mounts plus a
/// fallback, every one of them the same thin adapter into the dispatcher.
///
/// The logical surface grows by adding route-table entries, never by adding
/// mounts; the deployable-unit ceiling is [`MAX_PHYSICAL_ENTRY_POINTS`].
pub const PHYSICAL_MOUNTS: &[&str] = &[
    "/auth/{*rest}",
    "/cards/{*rest}",
    "/enrollments/{*rest}",
    "/business/{*rest}",
    "/businesses/{*rest}",
    "/internal/{*rest}",
    "/admin/{*rest}",
];

/// Hard ceiling on deployable entry points, fallback included.
pub const MAX_PHYSICAL_ENTRY_POINTS: usize = 12;

#[derive(Clone)]
struct EntryState {
    dispatcher: Arc<Dispatcher>,
    max_body_bytes: usize,
}

/// Builds the axum router over the fixed set of physical entry points.
pub fn router(dispatcher: Arc<Dispatcher>, max_body_bytes: usize) -> Router {
    let state = EntryState {
        dispatcher,
        max_body_bytes,
    };
    let mut app: Router<EntryState> = Router::new();
    for mount in PHYSICAL_MOUNTS {
        app = app.route(mount, any(entry));
    }
    app.fallback(entry).with_state(state)
}

/// The only handler any entry point runs: adapt the request, dispatch, and
/// render the response.
async fn entry(State(state): State<EntryState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return to_http(GatewayResponse::from_error(&Error::InvalidInput(
                "request body too large or unreadable".to_string(),
            )));
        }
    };

    let response = state
        .dispatcher
        .dispatch(parts.method, parts.uri.path(), &parts.headers, bytes)
        .await;
    to_http(response)
}

fn to_http(response: GatewayResponse) -> Response {
    let GatewayResponse {
        status,
        headers,
        body,
    } = response;

    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }

    let result = if body.is_null() {
        builder.body(Body::empty())
    } else {
        builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
    };
    result.unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Binds and serves until the process is stopped.
pub async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| Error::Transient(format!("failed to bind {addr}: {err}")))?;
    info!(%addr, entry_points = PHYSICAL_MOUNTS.len() + 1, "gateway listening");
    axum::serve(listener, app)
        .await
        .map_err(|err| Error::Internal(format!("gateway server failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_surface_stays_within_budget() {
        // Mounts plus the fallback are the deployable units.
        assert!(PHYSICAL_MOUNTS.len() + 1 <= MAX_PHYSICAL_ENTRY_POINTS);
    }

    #[test]
    fn test_mounts_are_prefix_wildcards() {
        for mount in PHYSICAL_MOUNTS {
            assert!(mount.starts_with('/'));
            assert!(mount.ends_with("{*rest}"));
        }
    }
}
