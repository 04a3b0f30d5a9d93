use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use secrecy::SecretString;
use serde_json::Value;
use std::sync::Arc;
use crate::{
    auth::audit::AuditEventType,
    auth::utils::{origin_from_headers, sanitize_for_logging},
    errors::{AppError, Result},
    models::api::{
        AuditEventsResponse, AuditQuery, ComplianceRequest, ComplianceResponse, DecryptRequest,
        DecryptResponse, EncryptRequest, EncryptResponse, MessageResponse, PolicyResponse,
        RegisterRequest, SessionsResponse, ThreatScanResponse,
    },
    models::ses::ADMIN_PERMISSION,
    routes::{auth::bearer_session, blocking},
    service::{TrustService, DEFAULT_AUDIT_LIMIT},
};

/// Largest page the audit listing will return
const MAX_AUDIT_LIMIT: usize = 1000;

/// Score the whole request body
pub async fn threat_scan(
    Extension(service): Extension<Arc<TrustService>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<ThreatScanResponse>> {
    let origin = origin_from_headers(&headers);
    let verdict = blocking(service, move |service| service.scan_payload(&payload, origin)).await?;
    Ok(Json(ThreatScanResponse {
        success: true,
        analysis: verdict,
    }))
}

pub async fn encrypt(
    Extension(service): Extension<Arc<TrustService>>,
    Json(req): Json<EncryptRequest>,
) -> Result<Json<EncryptResponse>> {
    let aad = req.context.unwrap_or_default();
    let sealed = service.encrypt(req.data.as_bytes(), aad.as_bytes())?;
    Ok(Json(EncryptResponse {
        success: true,
        result: sealed,
    }))
}

pub async fn decrypt(
    Extension(service): Extension<Arc<TrustService>>,
    Json(req): Json<DecryptRequest>,
) -> Result<Json<DecryptResponse>> {
    let aad = req.context.unwrap_or_default();
    let plaintext = service.decrypt(&req.sealed, aad.as_bytes())?;
    let data = String::from_utf8(plaintext)
        .map_err(|_| AppError::crypto("plaintext is not valid UTF-8"))?;
    Ok(Json(DecryptResponse { success: true, data }))
}

pub async fn compliance_check(
    Extension(service): Extension<Arc<TrustService>>,
    Json(req): Json<ComplianceRequest>,
) -> Result<Json<ComplianceResponse>> {
    Ok(Json(ComplianceResponse {
        success: true,
        compliance: service.check_compliance(&req.data_type, &req.operation),
    }))
}

pub async fn audit_events(
    Extension(service): Extension<Arc<TrustService>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditEventsResponse>> {
    let filter = query
        .event_type
        .as_deref()
        .map(str::parse::<AuditEventType>)
        .transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).min(MAX_AUDIT_LIMIT);

    let events = service.list_audit_events(filter, limit)?;
    Ok(Json(AuditEventsResponse {
        success: true,
        total_events: service.audit_event_count(),
        returned_events: events.len(),
        events,
    }))
}

pub async fn get_policies(
    Extension(service): Extension<Arc<TrustService>>,
) -> Result<Json<PolicyResponse>> {
    Ok(Json(PolicyResponse {
        success: true,
        policies: service.current_policy().as_ref().clone(),
    }))
}

/// Update the fields named in the body; the rest of the policy is kept.
/// Requires an admin session.
pub async fn update_policies(
    Extension(service): Extension<Arc<TrustService>>,
    headers: HeaderMap,
    Json(patch): Json<Value>,
) -> Result<Json<PolicyResponse>> {
    let session_id = bearer_session(&headers)?;
    let origin = origin_from_headers(&headers);
    let (session, installed) = blocking(service, move |service| {
        let session = service.require_permission(&session_id, ADMIN_PERMISSION)?;
        let installed = service.patch_policy(&patch, origin)?;
        Ok((session, installed))
    })
    .await?;

    tracing::info!(
        principal = %session.principal,
        version = installed.version,
        "Policy updated through the API"
    );
    Ok(Json(PolicyResponse {
        success: true,
        policies: installed.as_ref().clone(),
    }))
}

/// Live sessions without their bearer ids. Requires an admin session.
pub async fn list_sessions(
    Extension(service): Extension<Arc<TrustService>>,
    headers: HeaderMap,
) -> Result<Json<SessionsResponse>> {
    let session_id = bearer_session(&headers)?;
    let sessions = blocking(service, move |service| {
        service.require_permission(&session_id, ADMIN_PERMISSION)?;
        service.active_sessions()
    })
    .await?;
    Ok(Json(SessionsResponse {
        success: true,
        total_sessions: sessions.len(),
        sessions,
    }))
}

/// Provision a credential, admin principals included. Requires an admin session.
pub async fn provision_credential(
    Extension(service): Extension<Arc<TrustService>>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    let session_id = bearer_session(&headers)?;
    let origin = origin_from_headers(&headers);
    let secret = SecretString::from(req.password);
    let principal = req.username;

    blocking(service, move |service| {
        let admin = service.require_permission(&session_id, ADMIN_PERMISSION)?;
        service.provision_credential(&principal, &secret, origin)?;
        tracing::info!(
            admin = %admin.principal,
            principal = %sanitize_for_logging(&principal),
            "Credential provisioned through the API"
        );
        Ok(())
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            success: true,
            message: "Credential provisioned".to_string(),
        }),
    ))
}
