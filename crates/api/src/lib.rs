//! HTTP API layer for cmsvs-rs.
//!
//! This crate provides the REST boundary over the core services:
//!
//! - **Endpoints**: auth, requests, attachments, notifications, admin, metrics
//! - **Extractors**: authenticated and admin users from request extensions
//! - **Middleware**: session token resolution and per-request performance
//!   recording
//! - **Responses**: a uniform JSON envelope
//!
//! Built on Axum 0.8 with Tower middleware stack. `auth_middleware` resolves
//! bearer session tokens and places the user model in request extensions
//! before routing reaches the handlers.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;

pub use endpoints::router;
pub use middleware::{AppState, auth_middleware, performance_middleware};
