//! Loyalty ledger and request-multiplexing gateway.
//!
//! The ledger side atomically credits and debits points on customer cards
//! with an idempotent, append-only audit trail; the gateway side routes an
//! open-ended set of logical API operations through a small fixed number of
//! physical entry points while enforcing auth, rate limits and CORS per
//! logical route.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod infrastructure;
