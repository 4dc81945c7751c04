use axum::{
    extract::State,
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::middleware::ClientIp;
use crate::analytics::{PageVisit, StatsRefresher, TrackOutcome, VisitTracker};
use crate::auth::{AuthService, SessionContext, SessionUser};
use crate::chat::{ChatCompletion, ChatError, ChatMessage};
use crate::config::AnalyticsConfig;
use crate::models::{EmailSignup, SignupRequest, TrackVisitRequest};
use crate::signup::{SignupError, SignupService, SUCCESS_MESSAGE};

pub struct AppState {
    pub tracker: VisitTracker,
    pub signups: SignupService,
    /// None when no chat provider is configured
    pub chat: Option<Arc<dyn ChatCompletion>>,
    pub refresher: StatsRefresher,
    pub auth: Arc<AuthService>,
    pub analytics_config: AnalyticsConfig,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

#[derive(Serialize)]
pub struct TrackVisitResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<crate::analytics::IgnoreReason>,
}

/// Log a page view
pub async fn track_visit(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionContext>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    headers: HeaderMap,
    Json(payload): Json<TrackVisitRequest>,
) -> Result<(StatusCode, Json<TrackVisitResponse>), ApiError> {
    let page = payload.page.trim();
    if page.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Page cannot be empty"));
    }

    let user_agent = headers.get(USER_AGENT).and_then(|h| h.to_str().ok());

    let visit = PageVisit {
        page,
        session: &session,
        client_ip,
        referrer: payload.referrer.as_deref(),
        user_agent,
    };

    match state.tracker.track(visit).await {
        Ok(TrackOutcome::Recorded(_)) => Ok((
            StatusCode::CREATED,
            Json(TrackVisitResponse {
                status: "recorded",
                reason: None,
            }),
        )),
        Ok(TrackOutcome::Ignored(reason)) => Ok((
            StatusCode::OK,
            Json(TrackVisitResponse {
                status: "ignored",
                reason: Some(reason),
            }),
        )),
        Err(e) => {
            tracing::error!("Failed to track page visit: {:#}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to record visit",
            ))
        }
    }
}

#[derive(Serialize)]
pub struct SignupResponse {
    pub message: String,
    pub signup: EmailSignup,
}

/// Add an email to the launch list
pub async fn create_signup(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    match state
        .signups
        .sign_up(&payload.email, payload.source.as_deref())
        .await
    {
        Ok(signup) => Ok((
            StatusCode::CREATED,
            Json(SignupResponse {
                message: SUCCESS_MESSAGE.to_string(),
                signup,
            }),
        )),
        Err(e) => {
            let status = match e {
                SignupError::Empty | SignupError::Invalid => StatusCode::BAD_REQUEST,
                SignupError::AlreadySignedUp => StatusCode::CONFLICT,
                SignupError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err(api_error(status, e.to_string()))
        }
    }
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

/// Ask the marketing-ops assistant
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Some(chat) = state.chat.as_ref() else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "AI chat is not configured",
        ));
    };

    match chat.complete(&payload.messages).await {
        Ok(reply) => Ok(Json(ChatResponse { reply })),
        Err(e @ ChatError::EmptyConversation) => {
            Err(api_error(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e @ ChatError::Unavailable(_)) => {
            Err(api_error(StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    pub user: Option<SessionUser>,
}

/// Describe the caller's session
pub async fn get_session(Extension(session): Extension<SessionContext>) -> Json<SessionResponse> {
    Json(SessionResponse {
        authenticated: session.is_authenticated(),
        user: session.user().cloned(),
    })
}

/// End the caller's session
pub async fn sign_out(
    State(state): State<Arc<AppState>>,
    Extension(mut session): Extension<SessionContext>,
) -> Json<SuccessResponse> {
    let message = if state.auth.sign_out(&mut session) {
        "Signed out"
    } else {
        "No active session"
    };

    Json(SuccessResponse {
        message: message.to_string(),
    })
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
