//! Middleware for the room service.
//!
//! # Components
//!
//! - `auth` - user token authentication for client routes
//! - `http_metrics` - HTTP request metrics for every response

pub mod auth;
pub mod http_metrics;

pub use auth::{require_user_auth, AuthState};
pub use http_metrics::http_metrics_middleware;
