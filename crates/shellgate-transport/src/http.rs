//! Token exchange and history query endpoints.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Query, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use shellgate_core::{
    HistoryEntry, HistoryError, HistoryFilter, HistoryStatistics, Permission,
    traits::DEFAULT_TOP_COMMANDS,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth::{AuthError, Claims, IssuedToken},
    gateway::Gateway,
    websocket::ws_handler,
};

/// Error returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("permission denied: requires '{0}'")]
    Forbidden(Permission),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "permission_denied",
            Self::BadRequest(_) => "bad_request",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.code(), "message": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::CredentialTooShort => Self::BadRequest(e.to_string()),
            AuthError::PermissionNotGrantable(p) => Self::Forbidden(p),
            AuthError::Signing(_) => Self::Internal(e.to_string()),
            AuthError::InvalidCredential
            | AuthError::MissingToken
            | AuthError::Expired
            | AuthError::InvalidToken(_) => Self::Unauthorized(e.to_string()),
        }
    }
}

impl From<HistoryError> for ApiError {
    fn from(e: HistoryError) -> Self {
        match e {
            HistoryError::Unavailable(_) => Self::Unavailable(e.to_string()),
            HistoryError::Internal(_) => Self::Internal(e.to_string()),
        }
    }
}

/// Token from an `Authorization: Bearer` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Claims of a request carrying a valid bearer token.
pub struct Authenticated(pub Claims);

impl Authenticated {
    /// Require a permission.
    ///
    /// # Errors
    /// Returns [`ApiError::Forbidden`] if the token lacks it.
    pub fn require(&self, permission: Permission) -> Result<(), ApiError> {
        if self.0.allows(permission) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(permission))
        }
    }
}

impl FromRequestParts<Arc<Gateway>> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, gateway: &Arc<Gateway>) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingToken)?;
        Ok(Self(gateway.authenticate(token)?))
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub credential: String,
    #[serde(default)]
    pub permissions: Option<Vec<Permission>>,
    /// Client name recorded as the token subject.
    #[serde(default)]
    pub client: Option<String>,
}

async fn issue_token(
    State(gateway): State<Arc<Gateway>>,
    Json(request): Json<TokenRequest>,
) -> Result<Json<IssuedToken>, ApiError> {
    let issued = gateway
        .authority()
        .issue(&request.credential, request.client.as_deref(), request.permissions)
        .inspect_err(|e| tracing::warn!("Token request rejected: {e}"))?;
    Ok(Json(issued))
}

async fn search_history(
    auth: Authenticated,
    State(gateway): State<Arc<Gateway>>,
    Query(filter): Query<HistoryFilter>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    auth.require(Permission::History)?;
    Ok(Json(gateway.history().search(&filter).await?))
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    top: Option<usize>,
}

async fn history_stats(
    auth: Authenticated,
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<HistoryStatistics>, ApiError> {
    auth.require(Permission::History)?;
    let top = query.top.unwrap_or(DEFAULT_TOP_COMMANDS);
    Ok(Json(gateway.history().statistics(top).await?))
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "sessions": gateway.registry().len() }))
}

/// Build the full HTTP + WebSocket router.
#[must_use]
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/token", post(issue_token))
        .route("/api/history", get(search_history))
        .route("/api/history/stats", get(history_stats))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}
