use axum::{
    async_trait,
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use shared::UserId;

use crate::errors::EngineError;
use crate::state::AppState;

pub const USER_HEADER: &str = "x-user-id";
pub const ADMIN_HEADER: &str = "x-admin-token";

/// JSON extractor whose rejections use the standard error body
/// instead of axum's plain-text message.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ValidationJsonRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => Err(ValidationJsonRejection(rejection)),
        }
    }
}

/// Like `ValidatedJson`, but a request without a body yields `T::default()`
pub struct OptionalJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for OptionalJson<T>
where
    T: DeserializeOwned + Default,
    S: Send + Sync,
{
    type Rejection = ValidationJsonRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ValidationJsonRejection(JsonRejection::from(e)))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(OptionalJson(T::default()));
        }
        match Json::<T>::from_bytes(&bytes) {
            Ok(Json(value)) => Ok(OptionalJson(value)),
            Err(rejection) => Err(ValidationJsonRejection(rejection)),
        }
    }
}

pub struct ValidationJsonRejection(JsonRejection);

impl IntoResponse for ValidationJsonRejection {
    fn into_response(self) -> Response {
        let original = self.0.body_text();

        let message = if let Some(field) = original
            .split("missing field `")
            .nth(1)
            .and_then(|s| s.split('`').next())
        {
            format!("Missing required field: {}", field)
        } else if let Some(variant) = original
            .split("unknown variant `")
            .nth(1)
            .and_then(|s| s.split('`').next())
        {
            format!("Unknown value: {}", variant)
        } else if original.contains("Content-Type") {
            "Expected an application/json body".to_string()
        } else {
            "Invalid request body: failed to parse JSON".to_string()
        };

        tracing::warn!(
            error_code = "INVALID_REQUEST",
            error_message = %message,
            original_error = %original,
            "Request body rejected"
        );
        metrics::counter!("errors_total", "category" => "Validation", "code" => "INVALID_REQUEST")
            .increment(1);

        let body = Json(json!({
            "error": {
                "code": "INVALID_REQUEST",
                "message": message,
                "category": "Validation",
            }
        }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

/// Caller identity set by the upstream authenticating layer
#[derive(Debug, Clone, Copy)]
pub struct UserIdentity(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for UserIdentity
where
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(|id| UserIdentity(UserId(id)))
            .ok_or(EngineError::MissingUser)
    }
}

/// Operator access; admin routes are closed when no token is configured
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

#[async_trait]
impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_token.as_deref() else {
            return Err(EngineError::AdminRequired);
        };
        let presented = parts
            .headers
            .get(ADMIN_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if presented.len() == expected.len()
            && presented
                .bytes()
                .zip(expected.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
        {
            Ok(AdminAccess)
        } else {
            Err(EngineError::AdminRequired)
        }
    }
}
