use crate::gateway::rate_limit::RateLimits;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Process configuration, resolved once at startup from flags and
/// environment, then passed down explicitly. Handlers never read ambient
/// state and nothing here is reloaded at runtime.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Loyalty ledger and request-multiplexing gateway", long_about = None)]
pub struct Config {
    /// Socket address the gateway listens on.
    #[arg(long, env = "POINTSGATE_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Path to the persistent ledger database. Requires a build with the
    /// `storage-rocksdb` feature; the ledger is in-memory when omitted.
    #[arg(long, env = "POINTSGATE_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Secret peppering credential digests.
    #[arg(long, env = "POINTSGATE_TOKEN_SECRET")]
    pub token_secret: String,

    /// Bootstrap bearer token granting admin access.
    #[arg(long, env = "POINTSGATE_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// Issued token lifetime in seconds.
    #[arg(long, env = "POINTSGATE_TOKEN_TTL_SECS", default_value_t = 3600)]
    pub token_ttl_secs: u64,

    /// Rate limit window in seconds.
    #[arg(long, env = "POINTSGATE_RATE_WINDOW_SECS", default_value_t = 60)]
    pub rate_window_secs: u64,

    /// Requests per window for login/registration.
    #[arg(long, env = "POINTSGATE_RATE_LIMIT_AUTH", default_value_t = 10)]
    pub rate_limit_auth: u32,

    /// Requests per window for read operations.
    #[arg(long, env = "POINTSGATE_RATE_LIMIT_READ", default_value_t = 120)]
    pub rate_limit_read: u32,

    /// Requests per window for write operations.
    #[arg(long, env = "POINTSGATE_RATE_LIMIT_WRITE", default_value_t = 60)]
    pub rate_limit_write: u32,

    /// Requests per window for admin operations.
    #[arg(long, env = "POINTSGATE_RATE_LIMIT_ADMIN", default_value_t = 30)]
    pub rate_limit_admin: u32,

    /// Origin allowed by CORS responses.
    #[arg(long, env = "POINTSGATE_CORS_ORIGIN", default_value = "*")]
    pub cors_origin: String,

    /// Maximum accepted request body size in bytes.
    #[arg(long, env = "POINTSGATE_MAX_BODY_BYTES", default_value_t = 262_144)]
    pub max_body_bytes: usize,
}

impl Config {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    pub fn rate_limits(&self) -> RateLimits {
        RateLimits {
            auth: self.rate_limit_auth,
            read: self.rate_limit_read,
            write: self.rate_limit_write,
            admin: self.rate_limit_admin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config =
            Config::try_parse_from(["pointsgate", "--token-secret", "s3cret"]).unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.rate_window(), Duration::from_secs(60));
        assert_eq!(config.rate_limits().read, 120);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_token_secret_is_required() {
        assert!(Config::try_parse_from(["pointsgate"]).is_err());
    }
}
