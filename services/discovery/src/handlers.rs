//! Discovery RPC gateway
//!
//! Maps the Connect unary protocol (HTTP POST JSON) onto the partition
//! handler set, plus the JWKS, health, and stats side endpoints.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;

use coral::jwt::{DEFAULT_TOKEN_TTL_SECS, create_bootstrap_token};
use coral::keys::SigningKeyStore;
use coral::types::{
    ConnectCode, CreateBootstrapTokenRequest, CreateBootstrapTokenResponse, ErrorBody,
    HealthResponse, LookupAgentRequest, LookupColonyRequest, RegisterAgentRequest,
    RegisterColonyRequest,
};
use coral::CoralError;

use crate::directory::PartitionDirectory;

pub struct AppState {
    pub directory: PartitionDirectory,
    pub version: String,
    pub started_at: std::time::Instant,
    signing_key_json: Option<String>,
    previous_keys_json: Option<String>,
    keys: OnceCell<Arc<SigningKeyStore>>,
}

impl AppState {
    pub fn new(
        directory: PartitionDirectory,
        version: String,
        signing_key_json: Option<String>,
        previous_keys_json: Option<String>,
    ) -> Self {
        Self {
            directory,
            version,
            started_at: std::time::Instant::now(),
            signing_key_json,
            previous_keys_json,
            keys: OnceCell::new(),
        }
    }

    /// The signing key store, parsed from configuration on first use.
    async fn signing_keys(&self) -> Result<Arc<SigningKeyStore>, ApiError> {
        let store = self
            .keys
            .get_or_try_init(|| async {
                let json = self.signing_key_json.as_deref().ok_or_else(|| {
                    CoralError::Internal("signing key is not configured".to_string())
                })?;
                let store =
                    SigningKeyStore::from_config(json, self.previous_keys_json.as_deref())?;
                Ok::<_, CoralError>(Arc::new(store))
            })
            .await
            .map_err(|e| {
                tracing::error!("failed to load signing keys: {}", e);
                ApiError::internal("signing key configuration is invalid")
            })?;
        Ok(Arc::clone(store))
    }
}

// ==================== Error Handling ====================

#[derive(Debug)]
pub struct ApiError(pub ConnectCode, pub String);

impl ApiError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        ApiError(ConnectCode::InvalidArgument, msg.into())
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        ApiError(ConnectCode::Unimplemented, msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError(ConnectCode::Internal, msg.into())
    }
}

impl From<CoralError> for ApiError {
    fn from(e: CoralError) -> Self {
        ApiError(e.code(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ErrorBody {
                code: self.0.as_str().to_string(),
                message: self.1,
            }),
        )
            .into_response()
    }
}

// ==================== Request Plumbing ====================

/// Client IP as seen by the edge: `CF-Connecting-IP`, else the first
/// `X-Forwarded-For` entry.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(ip) = headers
        .get("cf-connecting-ip")
        .and_then(|v| v.to_str().ok())
    {
        return Some(ip.trim().to_string());
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

fn parse_request<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let body = if body.is_empty() { b"{}" as &[u8] } else { body };
    serde_json::from_slice(body)
        .map_err(|e| ApiError::invalid_argument(format!("invalid request body: {}", e)))
}

// ==================== RPC Dispatch ====================

pub async fn rpc(
    State(state): State<Arc<AppState>>,
    Path(method): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        if content_type.starts_with("application/proto") {
            return Err(ApiError::invalid_argument("only JSON encoding is supported"));
        }
    }

    if let Ok(metrics) = state.directory.metrics().await {
        metrics.track(&method);
    }

    match method.as_str() {
        "RegisterColony" => {
            let request: RegisterColonyRequest = parse_request(&body)?;
            if request.mesh_id.is_empty() {
                return Err(ApiError::invalid_argument("meshId is required"));
            }
            let partition = state.directory.registry(&request.mesh_id).await?;
            let response = partition
                .register_colony(request, client_ip(&headers))
                .await?;
            Ok(Json(response).into_response())
        }
        "LookupColony" => {
            let request: LookupColonyRequest = parse_request(&body)?;
            if request.mesh_id.is_empty() {
                return Err(ApiError::invalid_argument("meshId is required"));
            }
            let partition = state.directory.registry(&request.mesh_id).await?;
            let response = partition.lookup_colony(&request.mesh_id).await?;
            Ok(Json(response).into_response())
        }
        "RegisterAgent" => {
            let request: RegisterAgentRequest = parse_request(&body)?;
            if request.mesh_id.is_empty() {
                return Err(ApiError::invalid_argument("meshId is required"));
            }
            let partition = state.directory.registry(&request.mesh_id).await?;
            let response = partition
                .register_agent(request, client_ip(&headers))
                .await?;
            Ok(Json(response).into_response())
        }
        "LookupAgent" => {
            let request: LookupAgentRequest = parse_request(&body)?;
            // the registry is partitioned by mesh; an agent lookup cannot be
            // routed without one
            if request.mesh_id.is_empty() {
                return Err(ApiError::invalid_argument("meshId is required"));
            }
            if request.agent_id.is_empty() {
                return Err(ApiError::invalid_argument("agentId is required"));
            }
            let partition = state.directory.registry(&request.mesh_id).await?;
            let response = partition.lookup_agent(&request.agent_id).await?;
            Ok(Json(response).into_response())
        }
        "Health" => {
            let mut registered_colonies: i64 = 0;
            for partition in state.directory.live_registries().await {
                match partition.count().await {
                    Ok((colonies, _)) => registered_colonies += colonies,
                    Err(e) => tracing::warn!(
                        partition = partition.id(),
                        "health aggregation skipped partition: {}",
                        e
                    ),
                }
            }
            Ok(Json(HealthResponse {
                status: "ok".to_string(),
                version: state.version.clone(),
                uptime_seconds: state.started_at.elapsed().as_secs() as i64,
                registered_colonies,
            })
            .into_response())
        }
        "CreateBootstrapToken" => {
            let request: CreateBootstrapTokenRequest = parse_request(&body)?;
            let keys = state.signing_keys().await?;
            let (jwt, expires_at) = create_bootstrap_token(
                &keys,
                &request.reef_id,
                &request.colony_id,
                &request.agent_id,
                &request.intent,
                DEFAULT_TOKEN_TTL_SECS,
            )?;
            Ok(Json(CreateBootstrapTokenResponse { jwt, expires_at }).into_response())
        }
        "RequestRelay" | "ReleaseRelay" => {
            Err(ApiError::unimplemented("relay is not implemented"))
        }
        other => Err(ApiError::unimplemented(format!("unknown method: {}", other))),
    }
}

// ==================== Side Endpoints ====================

pub async fn jwks(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let keys = state.signing_keys().await?;
    Ok((
        StatusCode::OK,
        [(header::CACHE_CONTROL, "public, max-age=300")],
        Json(keys.jwks()),
    )
        .into_response())
}

#[derive(Serialize)]
pub struct ServiceHealth {
    status: &'static str,
    version: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<ServiceHealth> {
    Json(ServiceHealth {
        status: "ok",
        version: state.version.clone(),
    })
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let metrics = state.directory.metrics().await?;
    let stats = metrics.stats().await?;
    Ok(Json(stats).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_cf_header() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", "1.2.3.4".parse().unwrap());
        headers.insert("x-forwarded-for", "5.6.7.8, 9.9.9.9".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn test_client_ip_falls_back_to_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "5.6.7.8, 9.9.9.9".parse().unwrap());
        assert_eq!(client_ip(&headers).as_deref(), Some("5.6.7.8"));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_parse_request_defaults_empty_body() {
        let request: LookupColonyRequest = parse_request(b"").unwrap();
        assert!(request.mesh_id.is_empty());
        assert!(parse_request::<LookupColonyRequest>(b"{not json").is_err());
    }
}
