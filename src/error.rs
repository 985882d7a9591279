use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error taxonomy.
///
/// Every variant maps to a stable machine-readable code and an HTTP status so
/// callers never see raw store errors. Idempotency and uniqueness collisions
/// are not represented here; they are recovered locally and surface as
/// success-with-existing-result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("card {0} not found")]
    CardNotFound(u64),
    #[error("card {0} is inactive")]
    CardInactive(u64),
    #[error("enrollment {0} not found")]
    EnrollmentNotFound(u64),
    #[error("point delta must be a non-zero integer")]
    InvalidDelta,
    #[error("delta {delta} would drive card {card_id} below zero (balance {balance})")]
    BalanceWouldGoNegative {
        card_id: u64,
        balance: u64,
        delta: i64,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("no route matches {method} {path}")]
    RouteNotFound { method: String, path: String },
    #[error("method not allowed, allowed methods: {}", allowed.join(", "))]
    MethodNotAllowed { allowed: Vec<String> },
    #[error("authentication required")]
    Unauthorized,
    #[error("insufficient privileges")]
    Forbidden,
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("ledger store unavailable: {0}")]
    Transient(String),
    #[error("ledger inconsistency: {0}")]
    Inconsistent(String),
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code included in every error response.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CardNotFound(_) => "card_not_found",
            Self::CardInactive(_) => "card_inactive",
            Self::EnrollmentNotFound(_) => "enrollment_not_found",
            Self::InvalidDelta => "invalid_delta",
            Self::BalanceWouldGoNegative { .. } => "balance_would_go_negative",
            Self::Conflict(_) => "conflict",
            Self::InvalidInput(_) => "invalid_input",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transient(_) => "store_unavailable",
            Self::Inconsistent(_) => "inconsistent",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status the gateway uses when rendering this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::CardNotFound(_) | Self::EnrollmentNotFound(_) | Self::RouteNotFound { .. } => 404,
            Self::CardInactive(_) | Self::Conflict(_) => 409,
            Self::InvalidDelta | Self::BalanceWouldGoNegative { .. } | Self::InvalidInput(_) => 400,
            Self::MethodNotAllowed { .. } => 405,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::RateLimited { .. } => 429,
            Self::Transient(_) => 503,
            Self::Inconsistent(_) | Self::Internal(_) => 500,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {err}"))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::CardNotFound(4).code(), "card_not_found");
        assert_eq!(Error::InvalidDelta.code(), "invalid_delta");
        assert_eq!(
            Error::MethodNotAllowed {
                allowed: vec!["GET".to_string(), "POST".to_string()]
            }
            .code(),
            "method_not_allowed"
        );
    }

    #[test]
    fn test_method_not_allowed_lists_methods() {
        let err = Error::MethodNotAllowed {
            allowed: vec!["GET".to_string(), "POST".to_string()],
        };
        assert!(err.to_string().contains("GET, POST"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::CardNotFound(1).http_status(), 404);
        assert_eq!(Error::Unauthorized.http_status(), 401);
        assert_eq!(Error::RateLimited { retry_after_secs: 9 }.http_status(), 429);
        assert_eq!(Error::Transient("down".to_string()).http_status(), 503);
        assert!(Error::Transient("down".to_string()).is_transient());
        assert!(!Error::Forbidden.is_transient());
    }
}
