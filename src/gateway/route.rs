use crate::error::{Error, Result};
use crate::gateway::auth::Principal;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Access level a route demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    Public,
    Customer,
    Admin,
}

/// Rate-limit class a route is throttled under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    Auth,
    Read,
    Write,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Fixed(String),
    Param(String),
    Wildcard,
}

/// A declarative path pattern: fixed segments, `{name}` captures and an
/// optional trailing `{*rest}` wildcard.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(Error::InvalidInput(format!(
                "path pattern must start with '/': {raw}"
            )));
        }

        let trimmed = raw.trim_start_matches('/');
        let mut segments = Vec::new();
        if !trimmed.is_empty() {
            let parts: Vec<&str> = trimmed.split('/').collect();
            for (idx, part) in parts.iter().enumerate() {
                if let Some(name) = part.strip_prefix("{*").and_then(|p| p.strip_suffix('}')) {
                    if name.is_empty() {
                        return Err(Error::InvalidInput(format!(
                            "wildcard segment needs a name: {raw}"
                        )));
                    }
                    if idx != parts.len() - 1 {
                        return Err(Error::InvalidInput(format!(
                            "wildcard must be the last segment: {raw}"
                        )));
                    }
                    segments.push(Segment::Wildcard);
                } else if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}'))
                {
                    if name.is_empty() {
                        return Err(Error::InvalidInput(format!(
                            "capture segment needs a name: {raw}"
                        )));
                    }
                    segments.push(Segment::Param(name.to_string()));
                } else if part.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "empty segment in path pattern: {raw}"
                    )));
                } else {
                    segments.push(Segment::Fixed((*part).to_string()));
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Matches `path` against the pattern, collecting captures.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let trimmed = path.trim_start_matches('/');
        let parts: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };

        let mut params = PathParams::default();
        for (idx, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => {
                    params.rest = Some(parts[idx..].join("/"));
                    return Some(params);
                }
                Segment::Param(name) => {
                    let part = parts.get(idx)?;
                    if part.is_empty() {
                        return None;
                    }
                    params.params.insert(name.clone(), (*part).to_string());
                }
                Segment::Fixed(expected) => {
                    if parts.get(idx)? != &expected.as_str() {
                        return None;
                    }
                }
            }
        }

        if parts.len() == self.segments.len() {
            Some(params)
        } else {
            None
        }
    }
}

/// Captures pulled out of a matched path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathParams {
    params: HashMap<String, String>,
    rest: Option<String>,
}

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn rest(&self) -> Option<&str> {
        self.rest.as_deref()
    }

    /// Fetches a capture that must parse as a numeric identifier.
    pub fn require_u64(&self, name: &str) -> Result<u64> {
        let raw = self
            .get(name)
            .ok_or_else(|| Error::Internal(format!("missing path capture '{name}'")))?;
        raw.parse()
            .map_err(|_| Error::InvalidInput(format!("path segment '{name}' must be numeric")))
    }
}

/// Everything a logical handler receives for one request.
pub struct RequestContext {
    pub params: PathParams,
    pub principal: Option<Principal>,
    pub body: Bytes,
}

impl RequestContext {
    /// Deserializes the request body, mapping malformed payloads to
    /// `InvalidInput`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Err(Error::InvalidInput("request body required".to_string()));
        }
        serde_json::from_slice(&self.body)
            .map_err(|err| Error::InvalidInput(format!("malformed request body: {err}")))
    }

    pub fn principal(&self) -> Result<&Principal> {
        self.principal.as_ref().ok_or(Error::Unauthorized)
    }
}

/// A logical operation reachable through the gateway.
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, ctx: RequestContext) -> Result<Value>;
}

/// One row of the route table.
pub struct RouteEntry {
    pub method: Method,
    pub pattern: PathPattern,
    pub auth: AuthLevel,
    pub rate: RateClass,
    pub handler: Arc<dyn RouteHandler>,
}

/// Lookup result for (method, path).
pub enum RouteMatch<'a> {
    Matched {
        entry: &'a RouteEntry,
        params: PathParams,
    },
    MethodMismatch {
        allowed: Vec<Method>,
    },
    NotFound,
}

/// The static, ordered mapping from (method, path pattern) to logical
/// handlers and their policy.
///
/// Built once at process start and read-only thereafter; declaration order is
/// significant because the first matching entry wins, so specific patterns
/// must precede wildcards. The table is what decouples the logical API
/// surface from the handful of physical entry points serving it.
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder {
            entries: Vec::new(),
            error: None,
        }
    }

    pub fn lookup(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let mut path_matched = false;
        for entry in &self.entries {
            if let Some(params) = entry.pattern.matches(path) {
                if entry.method == *method {
                    return RouteMatch::Matched { entry, params };
                }
                path_matched = true;
            }
        }

        if path_matched {
            RouteMatch::MethodMismatch {
                allowed: self.allowed_methods(path),
            }
        } else {
            RouteMatch::NotFound
        }
    }

    /// Every method declared for a path, in declaration order. Backs both
    /// 405 responses and CORS preflight answers.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut methods: Vec<Method> = Vec::new();
        for entry in &self.entries {
            if entry.pattern.matches(path).is_some() && !methods.contains(&entry.method) {
                methods.push(entry.method.clone());
            }
        }
        methods
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects route declarations, deferring the first pattern error to
/// `build` so tables read as one declarative block.
pub struct RouteTableBuilder {
    entries: Vec<RouteEntry>,
    error: Option<Error>,
}

impl RouteTableBuilder {
    pub fn route(
        mut self,
        method: Method,
        pattern: &str,
        auth: AuthLevel,
        rate: RateClass,
        handler: Arc<dyn RouteHandler>,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        match PathPattern::parse(pattern) {
            Ok(pattern) => self.entries.push(RouteEntry {
                method,
                pattern,
                auth,
                rate,
                handler,
            }),
            Err(err) => self.error = Some(err),
        }
        self
    }

    pub fn build(self) -> Result<RouteTable> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(RouteTable {
            entries: self.entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NullHandler;

    #[async_trait]
    impl RouteHandler for NullHandler {
        async fn handle(&self, _ctx: RequestContext) -> Result<Value> {
            Ok(json!(null))
        }
    }

    fn handler() -> Arc<dyn RouteHandler> {
        Arc::new(NullHandler)
    }

    #[test]
    fn test_pattern_fixed_and_captures() {
        let pattern = PathPattern::parse("/cards/{id}/activities").unwrap();
        let params = pattern.matches("/cards/42/activities").unwrap();
        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(params.require_u64("id").unwrap(), 42);

        assert!(pattern.matches("/cards/42").is_none());
        assert!(pattern.matches("/cards/42/activities/extra").is_none());
        assert!(pattern.matches("/enrollments/42/activities").is_none());
    }

    #[test]
    fn test_pattern_wildcard_captures_rest() {
        let pattern = PathPattern::parse("/admin/{*rest}").unwrap();
        let params = pattern.matches("/admin/analytics/summary").unwrap();
        assert_eq!(params.rest(), Some("analytics/summary"));
    }

    #[test]
    fn test_pattern_rejects_malformed() {
        assert!(PathPattern::parse("cards/{id}").is_err());
        assert!(PathPattern::parse("/cards//activities").is_err());
        assert!(PathPattern::parse("/files/{*rest}/tail").is_err());
        assert!(PathPattern::parse("/cards/{}").is_err());
    }

    #[test]
    fn test_numeric_capture_validation() {
        let pattern = PathPattern::parse("/cards/{id}").unwrap();
        let params = pattern.matches("/cards/abc").unwrap();
        assert!(matches!(
            params.require_u64("id"),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_first_match_wins() {
        let table = RouteTable::builder()
            .route(
                Method::GET,
                "/things/special",
                AuthLevel::Public,
                RateClass::Read,
                handler(),
            )
            .route(
                Method::GET,
                "/things/{id}",
                AuthLevel::Public,
                RateClass::Read,
                handler(),
            )
            .build()
            .unwrap();

        match table.lookup(&Method::GET, "/things/special") {
            RouteMatch::Matched { entry, .. } => {
                assert_eq!(entry.pattern.raw(), "/things/special");
            }
            _ => panic!("expected a match"),
        }
        match table.lookup(&Method::GET, "/things/7") {
            RouteMatch::Matched { entry, params } => {
                assert_eq!(entry.pattern.raw(), "/things/{id}");
                assert_eq!(params.get("id"), Some("7"));
            }
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn test_method_mismatch_lists_declared_methods() {
        let table = RouteTable::builder()
            .route(
                Method::GET,
                "/things/{id}",
                AuthLevel::Public,
                RateClass::Read,
                handler(),
            )
            .route(
                Method::DELETE,
                "/things/{id}",
                AuthLevel::Admin,
                RateClass::Admin,
                handler(),
            )
            .build()
            .unwrap();

        match table.lookup(&Method::POST, "/things/7") {
            RouteMatch::MethodMismatch { allowed } => {
                assert_eq!(allowed, vec![Method::GET, Method::DELETE]);
            }
            _ => panic!("expected a method mismatch"),
        }
        assert!(matches!(
            table.lookup(&Method::GET, "/nothing"),
            RouteMatch::NotFound
        ));
    }
}
