//! The request-multiplexing gateway.
//!
//! An unbounded logical API surface is declared in a static [`route::RouteTable`]
//! and served through a small fixed set of physical entry points
//! ([`http::PHYSICAL_MOUNTS`]); the [`dispatch::Dispatcher`] applies
//! cross-cutting policy and invokes the matched logical handler.

pub mod auth;
pub mod dispatch;
pub mod handlers;
pub mod http;
pub mod rate_limit;
pub mod route;
