use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use secrecy::SecretString;
use std::sync::Arc;
use crate::{
    auth::utils::{extract_bearer_token, origin_from_headers},
    errors::{AppError, Result},
    models::api::{
        LoginRequest, LoginResponse, MessageResponse, RegisterRequest, SessionRequest,
        ValidateResponse,
    },
    routes::blocking,
    service::{AuthRequest, TrustService},
};

pub async fn register(
    Extension(service): Extension<Arc<TrustService>>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    let origin = origin_from_headers(&headers);
    let secret = SecretString::from(req.password);
    let principal = req.username;

    blocking(service, move |service| {
        service.register_credential(&principal, &secret, origin)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            success: true,
            message: "Credential registered".to_string(),
        }),
    ))
}

pub async fn login(
    Extension(service): Extension<Arc<TrustService>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let (Some(username), Some(password)) = (req.username, req.password) else {
        return Err(AppError::bad_request("Missing username or password"));
    };

    let origin = origin_from_headers(&headers);
    let request = AuthRequest {
        principal: username,
        secret: SecretString::from(password),
        permissions: req.permissions,
        second_factor: req.second_factor,
    };

    let session = blocking(service, move |service| service.authenticate(request, origin)).await?;
    Ok(Json(session.into()))
}

pub async fn logout(
    Extension(service): Extension<Arc<TrustService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MessageResponse>> {
    let session_id = session_id_from(&headers, &body)?;
    let origin = origin_from_headers(&headers);

    let removed = blocking(service, move |service| service.logout(&session_id, origin)).await?;
    if !removed {
        return Err(AppError::bad_request("Invalid session"));
    }

    Ok(Json(MessageResponse {
        success: true,
        message: "Logged out successfully".to_string(),
    }))
}

pub async fn validate(
    Extension(service): Extension<Arc<TrustService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ValidateResponse>> {
    let session_id = session_id_from(&headers, &body)?;
    let session = blocking(service, move |service| service.validate_session(&session_id)).await?;
    Ok(Json(session.into()))
}

/// Session id from the JSON body, falling back to a bearer token
fn session_id_from(headers: &HeaderMap, body: &Bytes) -> Result<String> {
    if !body.is_empty() {
        let req: SessionRequest = serde_json::from_slice(body)
            .map_err(|e| AppError::bad_request(format!("Invalid JSON body: {}", e)))?;
        if let Some(id) = req.session_id.filter(|id| !id.trim().is_empty()) {
            return Ok(id);
        }
    }

    extract_bearer_token(headers).ok_or_else(|| AppError::bad_request("Missing session_id"))
}

/// Session id for admin-only routes, which only accept the Authorization header
pub(crate) fn bearer_session(headers: &HeaderMap) -> Result<String> {
    extract_bearer_token(headers)
        .ok_or_else(|| AppError::SessionInvalid("missing bearer token".to_string()))
}
