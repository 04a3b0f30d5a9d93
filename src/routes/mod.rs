pub mod auth;
pub mod security;

use axum::{
    extract::Extension,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use crate::errors::{AppError, Result};
use crate::service::{HealthReport, TrustService};

/// All service routes, with the service attached as an extension
pub fn router(service: Arc<TrustService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(auth_routes())
        .merge(security_routes())
        .layer(Extension(service))
}

fn auth_routes() -> Router {
    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/validate", post(auth::validate))
}

fn security_routes() -> Router {
    Router::new()
        .route("/security/threat-scan", post(security::threat_scan))
        .route("/security/encrypt", post(security::encrypt))
        .route("/security/decrypt", post(security::decrypt))
        .route(
            "/security/policies",
            get(security::get_policies).put(security::update_policies),
        )
        .route("/security/sessions", get(security::list_sessions))
        .route("/security/credentials", post(security::provision_credential))
        .route("/compliance/check", post(security::compliance_check))
        .route("/audit/events", get(security::audit_events))
}

async fn health(Extension(service): Extension<Arc<TrustService>>) -> Result<Json<HealthReport>> {
    Ok(Json(service.health()?))
}

/// Run CPU-heavy service work (key derivation) off the async workers
pub(crate) async fn blocking<T, F>(service: Arc<TrustService>, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&TrustService) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || work(&service))
        .await
        .map_err(|e| AppError::storage(format!("worker task failed: {}", e)))?
}
