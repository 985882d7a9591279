use crate::error::Error;
use crate::gateway::auth::AuthService;
use crate::gateway::rate_limit::RateLimiter;
use crate::gateway::route::{AuthLevel, RequestContext, RouteMatch, RouteTable};
use axum::body::Bytes;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_METHOD, ALLOW, ORIGIN, RETRY_AFTER,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

/// CORS policy applied by the dispatcher ahead of every other check.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    pub allow_origin: String,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allow_origin: "*".to_string(),
        }
    }
}

/// A fully rendered gateway response, independent of the HTTP layer.
#[derive(Debug)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Value,
}

impl GatewayResponse {
    fn ok(data: Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: Vec::new(),
            body: json!({ "status": "ok", "data": data }),
        }
    }

    pub(crate) fn from_error(err: &Error) -> Self {
        let status = StatusCode::from_u16(err.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut headers = Vec::new();
        match err {
            Error::MethodNotAllowed { allowed } => {
                push_header(&mut headers, ALLOW, &allowed.join(", "));
            }
            Error::RateLimited { retry_after_secs } => {
                push_header(&mut headers, RETRY_AFTER, &retry_after_secs.to_string());
            }
            _ => {}
        }
        Self {
            status,
            headers,
            body: json!({
                "status": "error",
                "code": err.code(),
                "message": err.to_string(),
            }),
        }
    }

    fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            headers: Vec::new(),
            body: Value::Null,
        }
    }

    /// The `code` field of an error envelope, if this is one.
    pub fn error_code(&self) -> Option<&str> {
        self.body.get("code").and_then(Value::as_str)
    }
}

fn push_header(headers: &mut Vec<(HeaderName, HeaderValue)>, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.push((name, value));
    }
}

/// The thin runtime behind every physical entry point.
///
/// Applies cross-cutting policy in a fixed order: CORS preflight
/// short-circuit, route lookup, authentication, rate limiting, then the
/// logical handler. Entry points never carry bespoke logic; they all funnel
/// into [`Dispatcher::dispatch`].
pub struct Dispatcher {
    table: Arc<RouteTable>,
    auth: Arc<AuthService>,
    limiter: Arc<RateLimiter>,
    cors: CorsPolicy,
}

impl Dispatcher {
    pub fn new(
        table: Arc<RouteTable>,
        auth: Arc<AuthService>,
        limiter: Arc<RateLimiter>,
        cors: CorsPolicy,
    ) -> Self {
        Self {
            table,
            auth,
            limiter,
            cors,
        }
    }

    pub async fn dispatch(
        &self,
        method: Method,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> GatewayResponse {
        let path = normalize_path(path);
        let mut response = self.dispatch_inner(&method, &path, headers, body).await;
        push_header(
            &mut response.headers,
            ACCESS_CONTROL_ALLOW_ORIGIN,
            &self.cors.allow_origin,
        );
        response
    }

    async fn dispatch_inner(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> GatewayResponse {
        if *method == Method::OPTIONS && is_preflight(headers) {
            return self.preflight(path);
        }

        let (entry, params) = match self.table.lookup(method, path) {
            RouteMatch::Matched { entry, params } => (entry, params),
            RouteMatch::MethodMismatch { allowed } => {
                return GatewayResponse::from_error(&Error::MethodNotAllowed {
                    allowed: allowed.iter().map(Method::to_string).collect(),
                });
            }
            RouteMatch::NotFound => {
                debug!(%method, path, "no route matched");
                return GatewayResponse::from_error(&Error::RouteNotFound {
                    method: method.to_string(),
                    path: path.to_string(),
                });
            }
        };

        let principal = match self.auth.verify(headers).await {
            Ok(principal) => principal,
            Err(err) => return GatewayResponse::from_error(&err),
        };
        match (&principal, entry.auth) {
            (_, AuthLevel::Public) => {}
            (None, _) => return GatewayResponse::from_error(&Error::Unauthorized),
            (Some(principal), level) if !principal.satisfies(level) => {
                return GatewayResponse::from_error(&Error::Forbidden);
            }
            _ => {}
        }

        let caller = principal
            .as_ref()
            .map(|p| p.rate_key())
            .unwrap_or_else(|| client_key(headers));
        if let Err(err) = self.limiter.check(entry.rate, &caller).await {
            warn!(%method, path, caller, "rate limit exceeded");
            return GatewayResponse::from_error(&err);
        }

        let ctx = RequestContext {
            params,
            principal,
            body,
        };
        match entry.handler.handle(ctx).await {
            Ok(data) => GatewayResponse::ok(data),
            Err(err) => {
                debug!(%method, path, code = err.code(), "handler rejected request");
                GatewayResponse::from_error(&err)
            }
        }
    }

    /// Answers a CORS preflight without consulting auth or rate limits; the
    /// actual request is policed when it arrives.
    fn preflight(&self, path: &str) -> GatewayResponse {
        let allowed = self.table.allowed_methods(path);
        let methods = if allowed.is_empty() {
            "GET, POST, PUT, DELETE".to_string()
        } else {
            allowed
                .iter()
                .map(Method::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut response = GatewayResponse::no_content();
        push_header(&mut response.headers, ACCESS_CONTROL_ALLOW_METHODS, &methods);
        push_header(
            &mut response.headers,
            ACCESS_CONTROL_ALLOW_HEADERS,
            "authorization, content-type",
        );
        push_header(&mut response.headers, ACCESS_CONTROL_MAX_AGE, "600");
        response
    }
}

fn is_preflight(headers: &HeaderMap) -> bool {
    headers.contains_key(ORIGIN) && headers.contains_key(ACCESS_CONTROL_REQUEST_METHOD)
}

fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

fn normalize_path(path: &str) -> String {
    let path = path.split('?').next().unwrap_or(path);
    if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        path.to_string()
    }
}
